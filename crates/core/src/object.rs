use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use indexmap::IndexMap;
use nes65_o65::{
    DataArea, DebugSymbol, IpsPatch, LINK_IN_GROUP, LINK_THIS_PAGE, O65Module, RelocKind,
    SegmentId, render_raw,
};
use tracing::{debug, trace, warn};

use crate::diag::Diagnostic;
use crate::insn::WidthPrefix;
use crate::parser::{LinkKind, SymbolView};
use crate::span::{SourceId, Span};

/// Value of a label: an address inside a segment, or an absolute constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelValue {
    pub segment: Option<SegmentId>,
    pub value: i64,
}

/// A site that receives the base of a segment of this object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub address: u32,
    pub kind: RelocKind,
    pub target: SegmentId,
}

/// A site that receives the value of a symbol defined elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternRef {
    pub address: u32,
    pub kind: RelocKind,
    pub name: String,
}

/// A relative branch whose target is out of reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overflow {
    pub span: Span,
    pub target: String,
    /// Displacement that did not fit, when both ends are in one segment.
    pub distance: Option<i64>,
}

#[derive(Debug, Clone)]
struct PendingRef {
    segment: SegmentId,
    address: u32,
    prefix: WidthPrefix,
    name: String,
    addend: i64,
    depth: usize,
    ordinal: usize,
    span: Span,
}

#[derive(Debug, Clone, Default)]
struct SegmentState {
    area: DataArea,
    position: u32,
    /// Lowest and one-past-highest address touched by bytes or labels.
    extent: Option<(u32, u32)>,
    fixups: Vec<Fixup>,
    externs: Vec<ExternRef>,
    linkage: Option<(LinkKind, u32)>,
}

impl SegmentState {
    fn touch(&mut self, begin: u32, end: u32) {
        self.extent = Some(match self.extent {
            Some((low, high)) => (low.min(begin), high.max(end)),
            None => (begin, end),
        });
    }
}

/// Names made up by the assembler contain `#`, which identifiers cannot.
pub fn is_synthetic(name: &str) -> bool {
    name.contains('#')
}

fn is_exported(name: &str) -> bool {
    !name.starts_with('.') && !is_synthetic(name)
}

/// Bytes for `value` at a site of class `prefix`, with the matching
/// relocation class. `Rel8` has no relocation class.
pub fn encode_site(prefix: WidthPrefix, value: i64) -> (Vec<u8>, Option<RelocKind>) {
    let byte = |shift: u32| (value >> shift) as u8;
    match prefix {
        WidthPrefix::LowByte => (vec![byte(0)], Some(RelocKind::Low)),
        WidthPrefix::HighByte => (vec![byte(8)], Some(RelocKind::High { low: byte(0) })),
        WidthPrefix::AbsWord => (vec![byte(0), byte(8)], Some(RelocKind::Word)),
        WidthPrefix::Long => (vec![byte(0), byte(8), byte(16)], Some(RelocKind::Long)),
        WidthPrefix::SegByte => (
            vec![byte(16)],
            Some(RelocKind::Seg {
                offset: value as u16,
            }),
        ),
        WidthPrefix::Rel8 => (vec![byte(0)], None),
    }
}

/// The object being assembled: four segments, nested label scopes and the
/// references still waiting for a label.
#[derive(Debug, Clone)]
pub struct Object {
    segments: [SegmentState; 4],
    current: SegmentId,
    scopes: Vec<IndexMap<String, LabelValue>>,
    pending: Vec<PendingRef>,
    relaxed: BTreeSet<usize>,
    overflows: BTreeMap<usize, Overflow>,
    diagnostics: Vec<Diagnostic>,
    ordinal: usize,
    span: Span,
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl Object {
    pub fn new() -> Self {
        Self {
            segments: Default::default(),
            current: SegmentId::Code,
            scopes: vec![IndexMap::new()],
            pending: Vec::new(),
            relaxed: BTreeSet::new(),
            overflows: BTreeMap::new(),
            diagnostics: Vec::new(),
            ordinal: 0,
            span: Span::new(SourceId(0), 0, 0),
        }
    }

    /// Resets everything except the set of branches to relax.
    pub fn clear_most(&mut self) {
        let relaxed = std::mem::take(&mut self.relaxed);
        *self = Self::new();
        self.relaxed = relaxed;
    }

    /// Sets the statement that subsequent diagnostics and references belong to.
    pub fn begin_statement(&mut self, ordinal: usize, span: Span) {
        self.ordinal = ordinal;
        self.span = span;
    }

    pub fn select_segment(&mut self, segment: SegmentId) {
        self.current = segment;
    }

    pub fn current_segment(&self) -> SegmentId {
        self.current
    }

    fn state(&self, segment: SegmentId) -> &SegmentState {
        &self.segments[segment.index()]
    }

    fn state_mut(&mut self, segment: SegmentId) -> &mut SegmentState {
        &mut self.segments[segment.index()]
    }

    pub fn position(&self) -> u32 {
        self.state(self.current).position
    }

    /// Moves the cursor. Advancing inside a segment already in use reserves
    /// the skipped bytes, so `ptr *=*+2` counts towards the segment size.
    pub fn set_position(&mut self, position: u32) {
        let state = self.state_mut(self.current);
        if state.extent.is_some() && position > state.position {
            let from = state.position;
            state.touch(from, position);
        }
        state.position = position;
    }

    pub fn area(&self, segment: SegmentId) -> &DataArea {
        &self.state(segment).area
    }

    pub fn fixups(&self, segment: SegmentId) -> &[Fixup] {
        &self.state(segment).fixups
    }

    pub fn externs(&self, segment: SegmentId) -> &[ExternRef] {
        &self.state(segment).externs
    }

    pub fn set_linkage(&mut self, kind: LinkKind, param: u32) {
        let segment = self.current;
        self.state_mut(segment).linkage = Some((kind, param));
    }

    pub fn generate_byte(&mut self, value: u8) {
        let segment = self.current;
        let state = self.state_mut(segment);
        let address = state.position;
        state.area.write_byte(address, value);
        state.touch(address, address.wrapping_add(1));
        state.position = address.wrapping_add(1);
    }

    pub fn generate_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.generate_byte(*byte);
        }
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn start_scope(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    /// Closes the innermost scope. Returns `false` at the outermost scope.
    pub fn end_scope(&mut self) -> bool {
        if self.scopes.len() == 1 {
            return false;
        }
        let depth = self.scope_depth();
        self.resolve_pending(depth);
        self.scopes.pop();
        true
    }

    /// Defines `name` at the current position.
    pub fn define_label(&mut self, name: &str, hoist: usize, span: Span) {
        let value = LabelValue {
            segment: Some(self.current),
            value: i64::from(self.position()),
        };
        let position = self.position();
        self.state_mut(self.current).touch(position, position);
        self.insert_label(name, hoist, value, span);
    }

    pub fn define_constant(&mut self, name: &str, hoist: usize, value: i64, span: Span) {
        let value = LabelValue {
            segment: None,
            value,
        };
        self.insert_label(name, hoist, value, span);
    }

    fn insert_label(&mut self, name: &str, hoist: usize, value: LabelValue, span: Span) {
        let depth = self.scope_depth().saturating_sub(hoist);
        if self.scopes[depth].contains_key(name) {
            self.diagnostics.push(
                Diagnostic::error(span, format!("label '{name}' is already defined"))
                    .with_note("the first definition is kept"),
            );
            return;
        }
        trace!(label = name, depth, ?value, "define");
        self.scopes[depth].insert(name.to_string(), value);
    }

    /// Removes `name` from the innermost scope that defines it.
    pub fn undefine_label(&mut self, name: &str) {
        if let Some(scope) = self
            .scopes
            .iter_mut()
            .rev()
            .find(|scope| scope.contains_key(name))
        {
            scope.shift_remove(name);
        }
    }

    /// Innermost visible definition of `name`.
    pub fn find_label(&self, name: &str) -> Option<LabelValue> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Labels of the outermost scope, in definition order.
    pub fn global_labels(&self) -> impl Iterator<Item = (&str, LabelValue)> + '_ {
        self.scopes[0]
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
    }

    /// Emits a reference to `name + addend` at the current position.
    ///
    /// Labels already visible are resolved at once. Others stay pending
    /// until their scope closes and, failing that, become external.
    pub fn add_extern(&mut self, prefix: WidthPrefix, name: &str, addend: i64) {
        let (segment, address) = (self.current, self.position());
        let (ordinal, span) = (self.ordinal, self.span);
        self.generate_bytes(&vec![0; prefix.width()]);
        match self.find_label(name) {
            Some(label) => {
                self.resolve_site(segment, address, prefix, label, addend, ordinal, span, name)
            }
            None => self.pending.push(PendingRef {
                segment,
                address,
                prefix,
                name: name.to_string(),
                addend,
                depth: self.scope_depth(),
                ordinal,
                span,
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_site(
        &mut self,
        segment: SegmentId,
        address: u32,
        prefix: WidthPrefix,
        label: LabelValue,
        addend: i64,
        ordinal: usize,
        span: Span,
        name: &str,
    ) {
        let value = label.value.wrapping_add(addend);
        if prefix == WidthPrefix::Rel8 {
            let distance = (label.segment == Some(segment))
                .then(|| value - (i64::from(address) + 1));
            match distance {
                Some(distance) if (-128..=127).contains(&distance) => {
                    self.state_mut(segment).area.write_byte(address, distance as u8);
                }
                _ => self.flag_overflow(ordinal, span, name, distance),
            }
            return;
        }

        let (bytes, kind) = encode_site(prefix, value);
        let state = self.state_mut(segment);
        state.area.write_lump(address, &bytes);
        if let (Some(target), Some(kind)) = (label.segment, kind) {
            state.fixups.push(Fixup {
                address,
                kind,
                target,
            });
        }
    }

    fn flag_overflow(&mut self, ordinal: usize, span: Span, target: &str, distance: Option<i64>) {
        debug!(ordinal, target, ?distance, "branch target out of range");
        self.overflows.entry(ordinal).or_insert(Overflow {
            span,
            target: target.to_string(),
            distance,
        });
    }

    /// Resolves references made at `depth` or deeper against the labels of
    /// scope `depth`; the rest move one scope outward.
    fn resolve_pending(&mut self, depth: usize) {
        let pending = std::mem::take(&mut self.pending);
        for mut reference in pending {
            if reference.depth < depth {
                self.pending.push(reference);
                continue;
            }
            match self.scopes[depth].get(&reference.name).copied() {
                Some(label) => self.resolve_site(
                    reference.segment,
                    reference.address,
                    reference.prefix,
                    label,
                    reference.addend,
                    reference.ordinal,
                    reference.span,
                    &reference.name,
                ),
                None => {
                    reference.depth = depth.saturating_sub(1);
                    self.pending.push(reference);
                }
            }
        }
    }

    /// Closes every scope and turns the references left over into externs.
    ///
    /// Returns the number of scopes that were still open.
    pub fn close_segments(&mut self) -> usize {
        let mut unclosed = 0;
        while self.end_scope() {
            unclosed += 1;
        }
        self.resolve_pending(0);

        for reference in std::mem::take(&mut self.pending) {
            if is_synthetic(&reference.name) {
                let shown = reference.name.split('#').next().unwrap_or_default();
                self.diagnostics.push(Diagnostic::error(
                    reference.span,
                    format!("no '{shown}' label to branch to"),
                ));
                continue;
            }
            if reference.prefix == WidthPrefix::Rel8 {
                self.flag_overflow(reference.ordinal, reference.span, &reference.name, None);
                continue;
            }
            let (bytes, kind) = encode_site(reference.prefix, reference.addend);
            let Some(kind) = kind else {
                continue;
            };
            let state = self.state_mut(reference.segment);
            state.area.write_lump(reference.address, &bytes);
            state.externs.push(ExternRef {
                address: reference.address,
                kind,
                name: reference.name,
            });
        }
        unclosed
    }

    pub fn is_relaxed(&self, ordinal: usize) -> bool {
        self.relaxed.contains(&ordinal)
    }

    /// Marks statements whose branch must be rewritten on the next pass.
    pub fn relax(&mut self, ordinals: impl IntoIterator<Item = usize>) {
        self.relaxed.extend(ordinals);
    }

    pub fn relaxed(&self) -> &BTreeSet<usize> {
        &self.relaxed
    }

    pub fn overflows(&self) -> &BTreeMap<usize, Overflow> {
        &self.overflows
    }

    /// Overflowing branches that are not relaxed yet.
    pub fn new_overflows(&self) -> Vec<usize> {
        self.overflows
            .keys()
            .filter(|ordinal| !self.relaxed.contains(ordinal))
            .copied()
            .collect()
    }

    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Builds a relocatable module. Gaps inside a segment are filled with zero.
    pub fn to_o65(&self) -> O65Module {
        let mut module = O65Module::new();
        for segment in SegmentId::ALL {
            let state = self.state(segment);
            let Some((base, top)) = state.extent else {
                continue;
            };
            let holes = state.area.holes();
            if !holes.is_empty() {
                warn!(segment = segment.name(), ?holes, "gaps in segment filled with zero");
            }
            module.segment_mut(segment).base = base;
            module.load_segment_from(segment, &state.area.content_range(base, top));

            for fixup in &state.fixups {
                module.declare_fixup(segment, fixup.address - base, fixup.kind, fixup.target);
            }
            for reference in &state.externs {
                module.declare_relocation(
                    segment,
                    &reference.name,
                    reference.address - base,
                    reference.kind,
                );
            }
            if let Some((kind, param)) = state.linkage {
                let mode = match kind {
                    LinkKind::Group => LINK_IN_GROUP,
                    LinkKind::Page => LINK_THIS_PAGE,
                };
                module.add_linkage(segment, mode, param);
            }
        }

        for (name, label) in self.global_labels() {
            if is_synthetic(name) {
                continue;
            }
            module.debug_symbols.push(DebugSymbol {
                name: name.to_string(),
                segment: label.segment,
                address: label.value as u32,
            });
            if let Some(segment) = label.segment
                && is_exported(name)
            {
                module.declare_global(segment, name, label.value as u32);
            }
        }
        module
    }

    /// Builds an IPS patch of CODE and DATA with extern and global records.
    pub fn to_ips(&self) -> IpsPatch {
        let mut patch = IpsPatch::default();
        for segment in [SegmentId::Code, SegmentId::Data] {
            let state = self.state(segment);
            for (address, bytes) in state.area.blobs() {
                patch.add_data(address, bytes);
            }
            for reference in &state.externs {
                match reference.kind {
                    RelocKind::Low => patch.add_extern(&reference.name, reference.address, 1),
                    RelocKind::Word => patch.add_extern(&reference.name, reference.address, 2),
                    RelocKind::Long => patch.add_extern(&reference.name, reference.address, 3),
                    RelocKind::High { .. } | RelocKind::Seg { .. } => warn!(
                        symbol = reference.name,
                        address = reference.address,
                        "IPS cannot express this reference; it is left unpatched"
                    ),
                }
            }
        }
        for (name, label) in self.global_labels() {
            if label.segment.is_some() && is_exported(name) {
                patch.add_global(name, label.value as u32);
            }
        }
        patch
    }

    /// Flat CODE image from its lowest address, after `header_skip` zero bytes.
    pub fn to_raw(&self, min_size: usize, header_skip: usize) -> Vec<u8> {
        let state = self.state(SegmentId::Code);
        let origin = state.extent.map_or(0, |(base, _)| base);
        let mut image = vec![0; header_skip];
        image.extend(render_raw(&state.area, origin, min_size));
        image
    }

    /// Human-readable summary of labels, externs and fixups.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (depth, scope) in self.scopes.iter().enumerate() {
            for (name, label) in scope {
                let segment = label.segment.map_or("ABS", SegmentId::name);
                let _ = writeln!(out, "label {depth} {name} = {segment}:${:04X}", label.value);
            }
        }
        for segment in SegmentId::ALL {
            let state = self.state(segment);
            for reference in &state.externs {
                let _ = writeln!(
                    out,
                    "extern {}:${:04X} {:?} {}",
                    segment.name(),
                    reference.address,
                    reference.kind,
                    reference.name
                );
            }
            for fixup in &state.fixups {
                let _ = writeln!(
                    out,
                    "fixup {}:${:04X} {:?} -> {}",
                    segment.name(),
                    fixup.address,
                    fixup.kind,
                    fixup.target.name()
                );
            }
        }
        out
    }
}

impl SymbolView for Object {
    fn constant(&self, name: &str) -> Option<i64> {
        self.find_label(name)
            .filter(|label| label.segment.is_none())
            .map(|label| label.value)
    }
}
