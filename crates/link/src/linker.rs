use std::fmt;

use nes65_o65::{IpsPatch, IpsRecord, O65Module, RelocKind, SegmentId};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::refer::ReferMethod;
use crate::romaddr::RomMap;

/// Where a module segment would like to be placed.
///
/// Ordered by kind first and parameter second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LinkageWish {
    #[default]
    Anywhere,
    Here(u32),
    InGroup(u32),
    ThisPage(u32),
}

impl LinkageWish {
    pub fn address(self) -> Option<u32> {
        match self {
            Self::Here(address) => Some(address),
            _ => None,
        }
    }

    pub fn is_placed(self) -> bool {
        matches!(self, Self::Here(_))
    }
}

impl fmt::Display for LinkageWish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anywhere => f.write_str("anywhere"),
            Self::Here(address) => write!(f, "at ${address:04X}"),
            Self::InGroup(group) => write!(f, "in group {group}"),
            Self::ThisPage(page) => write!(f, "in page ${page:02X}"),
        }
    }
}

/// A public symbol of a new module that an earlier module already defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clash {
    pub symbol: String,
    pub segment: SegmentId,
    pub previous: String,
    pub previous_segment: SegmentId,
}

impl fmt::Display for Clash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "symbol '{}' in {} is already present in {} of '{}'",
            self.symbol,
            self.segment.name(),
            self.previous_segment.name(),
            self.previous
        )
    }
}

fn join_clashes(clashes: &[Clash]) -> String {
    clashes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("module '{module}' was rejected: {}", join_clashes(.clashes))]
    Clash { module: String, clashes: Vec<Clash> },
    #[error("cannot add {what} after linking")]
    AfterLink { what: String },
    #[error("'{name}' was defined as ${previous:X}, cannot redefine it as ${value:X}")]
    Redefined {
        name: String,
        previous: u32,
        value: u32,
    },
    #[error("modules are already linked")]
    AlreadyLinked,
}

/// An external symbol supplied by more than one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub symbol: String,
    pub modules: usize,
    pub defines: usize,
}

/// Everything [`Linker::link`] could not resolve. Linking still completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Modules skipped because a segment has no address.
    pub unplaced: Vec<(String, SegmentId)>,
    /// `(module, symbol)` pairs left without a value.
    pub undefined: Vec<(String, String)>,
    pub duplicates: Vec<Duplicate>,
    pub unresolved_references: Vec<String>,
    pub unused_defines: Vec<String>,
    /// Modules with relocation sites outside their segment.
    pub damaged: Vec<String>,
}

impl LinkReport {
    pub fn has_errors(&self) -> bool {
        !self.unplaced.is_empty()
            || !self.undefined.is_empty()
            || !self.duplicates.is_empty()
            || !self.unresolved_references.is_empty()
            || !self.damaged.is_empty()
    }

    pub fn problem_count(&self) -> usize {
        self.unplaced.len()
            + self.undefined.len()
            + self.duplicates.len()
            + self.unresolved_references.len()
            + self.damaged.len()
    }
}

#[derive(Debug, Clone)]
struct LinkModule {
    module: O65Module,
    name: String,
    /// Externals still waiting for a value.
    externs: Vec<String>,
    linkage: [LinkageWish; 4],
}

impl LinkModule {
    fn linkage(&self, seg: SegmentId) -> LinkageWish {
        self.linkage[seg.index()]
    }

    fn sort_key(&self) -> ([LinkageWish; 4], &str) {
        (
            [
                self.linkage(SegmentId::Code),
                self.linkage(SegmentId::Data),
                self.linkage(SegmentId::Zero),
                self.linkage(SegmentId::Bss),
            ],
            &self.name,
        )
    }

    /// Empty segments without symbols never need a place.
    fn needs_address(&self, seg: SegmentId) -> bool {
        let segment = self.module.segment(seg);
        !segment.bytes.is_empty() || !segment.publics.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Define {
    name: String,
    value: u32,
    used: bool,
}

/// Collects modules, places them and resolves their external symbols.
#[derive(Debug, Default)]
pub struct Linker {
    rom_map: RomMap,
    modules: Vec<LinkModule>,
    /// Public symbol to defining module index and segment.
    symbols: FxHashMap<String, (usize, SegmentId)>,
    defines: Vec<Define>,
    referers: Vec<(ReferMethod, String)>,
    groups: u32,
    linked: bool,
}

impl Linker {
    pub fn new(rom_map: RomMap) -> Self {
        Self {
            rom_map,
            ..Self::default()
        }
    }

    pub fn rom_map(&self) -> RomMap {
        self.rom_map
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Adds a module. Segments missing from `linkages` may go anywhere.
    ///
    /// A module defining a symbol that is already known is rejected as a
    /// whole and the earlier definition stays.
    pub fn add_object(
        &mut self,
        mut module: O65Module,
        name: impl Into<String>,
        linkages: &[(SegmentId, LinkageWish)],
    ) -> Result<(), LinkError> {
        let name = name.into();
        let mut linkage = [LinkageWish::Anywhere; 4];
        for (seg, wish) in linkages {
            linkage[seg.index()] = *wish;
            if let LinkageWish::Here(address) = *wish {
                module.locate(*seg, address);
            }
        }
        if self.linked && !linkage[SegmentId::Code.index()].is_placed() {
            return Err(LinkError::AfterLink {
                what: format!("module '{name}'"),
            });
        }

        let mut clashes = Vec::new();
        let mut fresh: Vec<(String, SegmentId)> = Vec::new();
        for seg in SegmentId::ALL {
            for symbol in module.symbol_list(seg) {
                let previous = match self.symbols.get(&symbol) {
                    Some((index, previous_seg)) => {
                        Some((self.modules[*index].name.clone(), *previous_seg))
                    }
                    None => fresh
                        .iter()
                        .find(|(other, _)| *other == symbol)
                        .map(|(_, previous_seg)| (name.clone(), *previous_seg)),
                };
                match previous {
                    Some((previous, previous_segment)) => clashes.push(Clash {
                        symbol,
                        segment: seg,
                        previous,
                        previous_segment,
                    }),
                    None => fresh.push((symbol, seg)),
                }
            }
        }
        if !clashes.is_empty() {
            for clash in &clashes {
                error!(module = %name, "{clash}");
            }
            return Err(LinkError::Clash {
                module: name,
                clashes,
            });
        }

        let index = self.modules.len();
        for (symbol, seg) in fresh {
            self.symbols.insert(symbol, (index, seg));
        }
        debug!(module = %name, code = %linkage[0], data = %linkage[1], "added module");
        self.modules.push(LinkModule {
            externs: module.extern_list(),
            module,
            name,
            linkage,
        });
        self.publish(index);
        Ok(())
    }

    /// Adds raw bytes as a CODE-only module, fixed at `address` when given.
    pub fn add_lump(
        &mut self,
        bytes: &[u8],
        address: Option<u32>,
        what: &str,
        name: Option<&str>,
    ) -> Result<(), LinkError> {
        let base = address.unwrap_or(0);
        let mut module = O65Module::new();
        module.load_segment_from(SegmentId::Code, bytes);
        module.segment_mut(SegmentId::Code).base = base;
        if let Some(name) = name {
            module.declare_global(SegmentId::Code, name, base);
        }
        let linkage = address.map_or(LinkageWish::Anywhere, LinkageWish::Here);
        self.add_object(module, what, &[(SegmentId::Code, linkage)])
    }

    /// Adds every data record of an IPS patch as a fixed module.
    ///
    /// Global and extern records go to the module whose bytes contain their
    /// address; the last module takes whatever is left over.
    pub fn load_ips(
        &mut self,
        patch: &IpsPatch,
        what: &str,
        transform: Option<&dyn Fn(u32) -> u32>,
    ) -> Result<(), LinkError> {
        let map = |address: u32| transform.map_or(address, |transform| transform(address));

        let mut lumps: Vec<(u32, Vec<u8>)> = patch
            .lumps()
            .into_iter()
            .map(|(address, bytes)| (map(address), bytes))
            .collect();
        lumps.sort_by_key(|(address, _)| *address);

        let mut globals = Vec::new();
        let mut externs = Vec::new();
        for record in &patch.records {
            match record {
                IpsRecord::Global { name, address } => globals.push((map(*address), name.as_str())),
                IpsRecord::Extern {
                    name,
                    address,
                    size,
                } => externs.push((map(*address), name.as_str(), *size)),
                IpsRecord::Data { .. } | IpsRecord::Rle { .. } => {}
            }
        }
        globals.sort();
        externs.sort();
        if lumps.is_empty()
            && let Some((address, _)) = globals.first()
        {
            lumps.push((*address, Vec::new()));
        }

        let mut first_error = None;
        let count = lumps.len();
        for (position, (address, bytes)) in lumps.into_iter().enumerate() {
            let last = position + 1 == count;
            let end = address.saturating_add(bytes.len() as u32);
            let inside = |at: u32| at >= address && at < end;

            let mut module = O65Module::new();
            module.load_segment_from(SegmentId::Code, &bytes);
            module.segment_mut(SegmentId::Code).base = address;

            let (mine, rest): (Vec<_>, Vec<_>) =
                globals.into_iter().partition(|(at, _)| last || inside(*at));
            globals = rest;
            for (at, name) in mine {
                module.declare_global(SegmentId::Code, name, at);
            }

            let (mine, rest): (Vec<_>, Vec<_>) =
                externs.into_iter().partition(|(at, _, _)| last || inside(*at));
            externs = rest;
            for (at, name, size) in mine {
                let kind = match size {
                    1 => RelocKind::Low,
                    2 => RelocKind::Word,
                    3 => RelocKind::Long,
                    _ => {
                        warn!(symbol = name, size, "IPS extern has an unsupported size");
                        continue;
                    }
                };
                if !inside(at) || !inside(at + u32::from(size) - 1) {
                    warn!(symbol = name, address = at, "IPS extern lies outside every block");
                    continue;
                }
                module.declare_relocation(SegmentId::Code, name, at - address, kind);
            }

            let name = format!("block ${address:06X} of {what}");
            if let Err(error) =
                self.add_object(module, name, &[(SegmentId::Code, LinkageWish::Here(address))])
            {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn create_linkage_group(&mut self) -> u32 {
        self.groups += 1;
        self.groups
    }

    pub fn size_list(&self, seg: SegmentId) -> Vec<u32> {
        self.modules
            .iter()
            .map(|module| module.module.segment_size(seg))
            .collect()
    }

    pub fn addr_list(&self, seg: SegmentId) -> Vec<Option<u32>> {
        self.modules
            .iter()
            .map(|module| module.linkage(seg).address())
            .collect()
    }

    pub fn linkage_list(&self, seg: SegmentId) -> Vec<LinkageWish> {
        self.modules.iter().map(|module| module.linkage(seg)).collect()
    }

    /// Fixes and relocates each segment that receives an address. `None`
    /// leaves the module's wish untouched.
    pub fn put_addr_list(&mut self, seg: SegmentId, addrs: &[Option<u32>]) {
        for (module, address) in self.modules.iter_mut().zip(addrs) {
            if let Some(address) = *address {
                module.linkage[seg.index()] = LinkageWish::Here(address);
                module.module.locate(seg, address);
            }
        }
    }

    pub fn segment(&self, seg: SegmentId, index: usize) -> &[u8] {
        &self.modules[index].module.segment(seg).bytes
    }

    pub fn name(&self, index: usize) -> &str {
        &self.modules[index].name
    }

    pub fn module(&self, index: usize) -> &O65Module {
        &self.modules[index].module
    }

    /// Supplies a value for externals no module defines.
    pub fn define_symbol(&mut self, name: &str, value: u32) -> Result<(), LinkError> {
        if self.linked {
            return Err(LinkError::AfterLink {
                what: format!("symbol '{name}'"),
            });
        }
        if let Some(define) = self.defines.iter().find(|define| define.name == name) {
            if define.value != value {
                return Err(LinkError::Redefined {
                    name: name.to_string(),
                    previous: define.value,
                    value,
                });
            }
            return Ok(());
        }
        self.defines.push(Define {
            name: name.to_string(),
            value,
            used: false,
        });
        Ok(())
    }

    /// Requests a patch with the value of `name`, applied as soon as the
    /// defining segment has an address.
    pub fn add_reference(&mut self, name: &str, reference: ReferMethod) -> Result<(), LinkError> {
        if let Some(value) = self.placed_symbol(name) {
            self.finish_reference(&reference, value, name);
            return Ok(());
        }
        if self.linked {
            return Err(LinkError::AfterLink {
                what: format!("a reference to '{name}'"),
            });
        }
        self.referers.push((reference, name.to_string()));
        Ok(())
    }

    fn defined_address(&self, name: &str) -> Option<(u32, bool)> {
        let (index, seg) = self.symbols.get(name)?;
        let module = &self.modules[*index];
        let address = module.module.segment(*seg).publics.get(name)?;
        Some((*address, module.linkage(*seg).is_placed()))
    }

    fn placed_symbol(&self, name: &str) -> Option<u32> {
        self.defined_address(name)
            .and_then(|(address, placed)| placed.then_some(address))
    }

    /// Resolves whatever waits on the placed symbols of a new module.
    fn publish(&mut self, index: usize) {
        let module = &self.modules[index];
        let defined: Vec<(String, u32)> = SegmentId::ALL
            .into_iter()
            .filter(|seg| module.linkage(*seg).is_placed())
            .flat_map(move |seg| {
                module
                    .module
                    .segment(seg)
                    .publics
                    .iter()
                    .map(|(name, address)| (name.clone(), *address))
            })
            .collect();
        for (name, value) in defined {
            self.link_symbol(&name, value);
        }
    }

    fn link_symbol(&mut self, name: &str, value: u32) {
        if self.linked {
            for module in &mut self.modules {
                let Some(position) = module.externs.iter().position(|ext| ext == name) else {
                    continue;
                };
                module.externs.remove(position);
                if let Err(error) = module.module.link_sym(name, value) {
                    warn!(module = %module.name, "{error}");
                }
            }
        }
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.referers)
            .into_iter()
            .partition(|(_, target)| target == name);
        self.referers = pending;
        for (reference, _) in ready {
            self.finish_reference(&reference, value, name);
        }
    }

    fn finish_reference(&mut self, reference: &ReferMethod, target: u32, what: &str) {
        let value = reference.evaluate(target);
        let digits = usize::from(reference.num_bytes.min(4)) * 2;
        let shown = if digits >= 8 {
            value
        } else {
            value & ((1u32 << (digits * 4)) - 1)
        };
        let title = format!("ref {what}: ${shown:0digits$X}");
        let address = self.rom_map.rom_to_nes(reference.from_addr);
        if let Err(error) = self.add_lump(&reference.encode(target), Some(address), &title, None) {
            error!("{error}");
        }
    }

    /// Resolves the externals of every placed module.
    ///
    /// Can only run once. Problems are logged and collected in the report;
    /// the modules are patched as far as possible either way.
    pub fn link(&mut self) -> Result<LinkReport, LinkError> {
        if self.linked {
            return Err(LinkError::AlreadyLinked);
        }
        self.linked = true;
        info!(modules = self.modules.len(), "linking");

        let mut report = LinkReport::default();
        for index in 0..self.modules.len() {
            let name = self.modules[index].name.clone();
            let unplaced: Vec<SegmentId> = SegmentId::ALL
                .into_iter()
                .filter(|seg| {
                    let module = &self.modules[index];
                    module.needs_address(*seg) && !module.linkage(*seg).is_placed()
                })
                .collect();
            if !unplaced.is_empty() {
                for seg in unplaced {
                    error!("module '{name}' is still without an address for {}", seg.name());
                    report.unplaced.push((name.clone(), seg));
                }
                continue;
            }

            debug!(module = %name, "resolving externals");
            let externs = std::mem::take(&mut self.modules[index].externs);
            let mut left = Vec::new();
            for ext in externs {
                let defined = self.defined_address(&ext);
                let owner_unplaced = matches!(defined, Some((_, false)));
                let mut value = defined.and_then(|(address, placed)| placed.then_some(address));
                let mut defines = 0;
                for define in self.defines.iter_mut().filter(|define| define.name == ext) {
                    value = Some(define.value);
                    define.used = true;
                    defines += 1;
                }
                let modules = usize::from(defined.is_some());

                let Some(value) = value else {
                    if owner_unplaced {
                        error!(module = %name, "symbol '{ext}' belongs to a module without an address");
                    } else {
                        error!(module = %name, "symbol '{ext}' is still undefined");
                    }
                    report.undefined.push((name.clone(), ext.clone()));
                    left.push(ext);
                    continue;
                };
                if modules + defines != 1 {
                    error!("symbol '{ext}' is defined in {modules} module(s) and {defines} define(s)");
                    report.duplicates.push(Duplicate {
                        symbol: ext.clone(),
                        modules,
                        defines,
                    });
                }
                if let Err(error) = self.modules[index].module.link_sym(&ext, value) {
                    warn!(module = %name, "{error}");
                }
            }
            if !left.is_empty() {
                error!(module = %name, "{} undefined symbol(s) remain", left.len());
            }
            self.modules[index].externs = left;
        }

        for (reference, name) in std::mem::take(&mut self.referers) {
            match self.placed_symbol(&name) {
                Some(value) => self.finish_reference(&reference, value, &name),
                None => self.referers.push((reference, name)),
            }
        }

        for module in &self.modules {
            if module.module.has_error() {
                error!(module = %module.name, "relocation sites fall outside their segment");
                report.damaged.push(module.name.clone());
            }
        }
        for (_, name) in &self.referers {
            error!("unresolved reference: {name}");
            report.unresolved_references.push(name.clone());
        }
        for define in self.defines.iter().filter(|define| !define.used) {
            warn!("symbol '{}' was defined but never used", define.name);
            report.unused_defines.push(define.name.clone());
        }
        Ok(report)
    }

    /// Orders modules by their linkage wishes, then by name.
    pub fn sort_by_address(&mut self) {
        self.modules.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        self.symbols.clear();
        for (index, module) in self.modules.iter().enumerate() {
            for seg in SegmentId::ALL {
                for name in module.module.segment(seg).publics.keys() {
                    self.symbols.entry(name.clone()).or_insert((index, seg));
                }
            }
        }
    }
}
