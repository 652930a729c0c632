use super::*;
use thiserror::Error;
use tracing::trace;

/// Custom header type carrying per-segment linkage requests.
pub const LINKAGE_HEADER: u8 = 10;

/// Linkage header modes.
pub const LINK_ANYWHERE: u8 = 0;
pub const LINK_HERE: u8 = 1;
pub const LINK_IN_GROUP: u8 = 2;
pub const LINK_THIS_PAGE: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentId {
    Code,
    Data,
    Bss,
    Zero,
}

impl SegmentId {
    pub const ALL: [Self; 4] = [Self::Code, Self::Data, Self::Bss, Self::Zero];

    /// Segment number used in relocation tables and export lists.
    pub fn area(self) -> u8 {
        match self {
            Self::Code => 2,
            Self::Data => 3,
            Self::Bss => 4,
            Self::Zero => 5,
        }
    }

    pub fn from_area(area: u8) -> Option<Self> {
        match area {
            2 => Some(Self::Code),
            3 => Some(Self::Data),
            4 => Some(Self::Bss),
            5 => Some(Self::Zero),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Code => "CODE",
            Self::Data => "DATA",
            Self::Bss => "BSS",
            Self::Zero => "ZERO",
        }
    }

    /// Whether the segment carries file contents (BSS and ZERO only have a size).
    pub fn has_contents(self) -> bool {
        matches!(self, Self::Code | Self::Data)
    }

    /// Position in [`SegmentId::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::Code => 0,
            Self::Data => 1,
            Self::Bss => 2,
            Self::Zero => 3,
        }
    }
}

/// Width class of a relocation site.
///
/// `High` and `Seg` sites only store the upper part of the value, so the
/// bits below it are kept here to carry additions across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocKind {
    Word,
    Low,
    High { low: u8 },
    Seg { offset: u16 },
    Long,
}

impl RelocKind {
    pub fn width(self) -> usize {
        match self {
            Self::Low | Self::High { .. } | Self::Seg { .. } => 1,
            Self::Word => 2,
            Self::Long => 3,
        }
    }

    /// Adds `delta` to the value stored at `bytes[offset..]`.
    ///
    /// Returns `false` when the site does not fit inside `bytes`.
    pub fn apply(&mut self, bytes: &mut [u8], offset: usize, delta: i64) -> bool {
        let Some(site) = offset
            .checked_add(self.width())
            .and_then(|end| bytes.get_mut(offset..end))
        else {
            return false;
        };
        match self {
            Self::Low => {
                site[0] = (i64::from(site[0]).wrapping_add(delta) & 0xFF) as u8;
            }
            Self::Word => {
                let value = i64::from(u16::from_le_bytes([site[0], site[1]])).wrapping_add(delta);
                site.copy_from_slice(&(value as u16).to_le_bytes());
            }
            Self::Long => {
                let value = i64::from(site[0])
                    | (i64::from(site[1]) << 8)
                    | (i64::from(site[2]) << 16);
                let value = value.wrapping_add(delta);
                site[0] = value as u8;
                site[1] = (value >> 8) as u8;
                site[2] = (value >> 16) as u8;
            }
            Self::High { low } => {
                let value = ((i64::from(site[0]) << 8) | i64::from(*low)).wrapping_add(delta);
                site[0] = (value >> 8) as u8;
                *low = value as u8;
            }
            Self::Seg { offset } => {
                let value = ((i64::from(site[0]) << 16) | i64::from(*offset)).wrapping_add(delta);
                site[0] = (value >> 16) as u8;
                *offset = value as u16;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocTarget {
    /// Index into [`O65Module::externs`].
    Symbol(usize),
    Segment(SegmentId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Offset of the site from the start of its segment.
    pub offset: u32,
    pub kind: RelocKind,
    pub target: RelocTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    pub base: u32,
    pub bytes: Vec<u8>,
    /// Exported names with their absolute addresses.
    pub publics: IndexMap<String, u32>,
    pub relocations: Vec<Relocation>,
}

impl Segment {
    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternSymbol {
    pub name: String,
    pub value: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomHeader {
    pub kind: u8,
    pub data: Vec<u8>,
}

/// One decoded entry of the linkage custom header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkageEntry {
    pub segment: SegmentId,
    pub mode: u8,
    pub param: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSymbol {
    pub name: String,
    pub segment: Option<SegmentId>,
    pub address: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolError {
    #[error("symbol '{name}' is not referenced by this module")]
    Unknown { name: String },
    #[error("symbol '{name}' is already defined")]
    Redefined { name: String },
}

/// A relocatable module with four segments and a table of external symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct O65Module {
    segments: [Segment; 4],
    pub externs: Vec<ExternSymbol>,
    pub custom_headers: Vec<CustomHeader>,
    pub debug_symbols: Vec<DebugSymbol>,
    error: bool,
}

impl O65Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment(&self, seg: SegmentId) -> &Segment {
        &self.segments[seg.index()]
    }

    pub fn segment_mut(&mut self, seg: SegmentId) -> &mut Segment {
        &mut self.segments[seg.index()]
    }

    pub fn base(&self, seg: SegmentId) -> u32 {
        self.segment(seg).base
    }

    pub fn segment_size(&self, seg: SegmentId) -> u32 {
        self.segment(seg).size()
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn load_segment_from(&mut self, seg: SegmentId, bytes: &[u8]) {
        self.segment_mut(seg).bytes = bytes.to_vec();
    }

    pub fn resize(&mut self, seg: SegmentId, size: u32) {
        self.segment_mut(seg).bytes.resize(size as usize, 0);
    }

    /// Writes one byte at `offset` from the segment start, growing it if needed.
    pub fn write_byte(&mut self, seg: SegmentId, offset: u32, value: u8) {
        let bytes = &mut self.segment_mut(seg).bytes;
        let offset = offset as usize;
        if bytes.len() <= offset {
            bytes.resize(offset + 1, 0);
        }
        bytes[offset] = value;
    }

    /// Moves a segment to a new base, patching every site that refers to it.
    pub fn locate(&mut self, seg: SegmentId, new_base: u32) {
        let delta = i64::from(new_base) - i64::from(self.base(seg));
        trace!(segment = seg.name(), from = self.base(seg), to = new_base, "locate");
        if delta != 0 {
            self.apply_to_sites(RelocTarget::Segment(seg), delta);
            for address in self.segment_mut(seg).publics.values_mut() {
                *address = (i64::from(*address) + delta) as u32;
            }
        }
        self.segment_mut(seg).base = new_base;
    }

    fn apply_to_sites(&mut self, target: RelocTarget, delta: i64) {
        let mut failed = false;
        for segment in &mut self.segments {
            let Segment {
                bytes, relocations, ..
            } = segment;
            for reloc in relocations.iter_mut().filter(|r| r.target == target) {
                failed |= !reloc.kind.apply(bytes, reloc.offset as usize, delta);
            }
        }
        if failed {
            self.error = true;
        }
    }

    fn extern_index(&self, name: &str) -> Option<usize> {
        self.externs.iter().position(|sym| sym.name == name)
    }

    /// Supplies the value of an external symbol and patches its sites.
    pub fn link_sym(&mut self, name: &str, value: u32) -> Result<(), SymbolError> {
        let index = self.extern_index(name).ok_or_else(|| SymbolError::Unknown {
            name: name.to_string(),
        })?;
        if self.externs[index].value.is_some() {
            return Err(SymbolError::Redefined {
                name: name.to_string(),
            });
        }
        self.externs[index].value = Some(value);
        self.apply_to_sites(RelocTarget::Symbol(index), i64::from(value));
        Ok(())
    }

    pub fn declare_global(&mut self, seg: SegmentId, name: &str, address: u32) {
        self.segment_mut(seg).publics.insert(name.to_string(), address);
    }

    /// Records a site referring to `name`; patches it at once if the value is known.
    pub fn declare_relocation(&mut self, seg: SegmentId, name: &str, offset: u32, kind: RelocKind) {
        let index = match self.extern_index(name) {
            Some(index) => index,
            None => {
                self.externs.push(ExternSymbol {
                    name: name.to_string(),
                    value: None,
                });
                self.externs.len() - 1
            }
        };
        let mut kind = kind;
        if let Some(value) = self.externs[index].value {
            let bytes = &mut self.segment_mut(seg).bytes;
            if !kind.apply(bytes, offset as usize, i64::from(value)) {
                self.error = true;
            }
            return;
        }
        self.segment_mut(seg).relocations.push(Relocation {
            offset,
            kind,
            target: RelocTarget::Symbol(index),
        });
    }

    /// Records a site referring to the base of a segment of this module.
    pub fn declare_fixup(&mut self, seg: SegmentId, offset: u32, kind: RelocKind, target: SegmentId) {
        self.segment_mut(seg).relocations.push(Relocation {
            offset,
            kind,
            target: RelocTarget::Segment(target),
        });
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.symbol_address(name).is_some()
    }

    pub fn symbol_address(&self, name: &str) -> Option<u32> {
        self.segments
            .iter()
            .find_map(|segment| segment.publics.get(name).copied())
    }

    pub fn symbol_segment(&self, name: &str) -> Option<SegmentId> {
        SegmentId::ALL
            .into_iter()
            .find(|seg| self.segment(*seg).publics.contains_key(name))
    }

    pub fn symbol_list(&self, seg: SegmentId) -> Vec<String> {
        self.segment(seg).publics.keys().cloned().collect()
    }

    /// Names of external symbols still waiting for a value.
    pub fn extern_list(&self) -> Vec<String> {
        self.externs
            .iter()
            .filter(|sym| sym.value.is_none())
            .map(|sym| sym.name.clone())
            .collect()
    }

    /// Fails when some external symbol is still referenced but undefined.
    pub fn verify(&self) -> Result<()> {
        let missing: Vec<_> = self
            .externs
            .iter()
            .enumerate()
            .filter(|(index, sym)| {
                sym.value.is_none()
                    && self.segments.iter().any(|segment| {
                        segment
                            .relocations
                            .iter()
                            .any(|r| r.target == RelocTarget::Symbol(*index))
                    })
            })
            .map(|(_, sym)| sym.name.as_str())
            .collect();
        if !missing.is_empty() {
            bail!("undefined symbols: {}", missing.join(", "));
        }
        Ok(())
    }

    pub fn custom_headers(&self) -> &[CustomHeader] {
        &self.custom_headers
    }

    pub fn add_custom_header(&mut self, kind: u8, data: Vec<u8>) {
        self.custom_headers.push(CustomHeader { kind, data });
    }

    pub fn add_linkage(&mut self, segment: SegmentId, mode: u8, param: u32) {
        let mut data = vec![segment.area() * 8 + mode];
        data.extend_from_slice(&param.to_le_bytes());
        self.add_custom_header(LINKAGE_HEADER, data);
    }

    /// Decodes every well-formed linkage header.
    pub fn linkage_wishes(&self) -> Vec<LinkageEntry> {
        self.custom_headers
            .iter()
            .filter(|header| header.kind == LINKAGE_HEADER && header.data.len() == 5)
            .filter_map(|header| {
                let code = header.data[0];
                let segment = SegmentId::from_area(code / 8)?;
                let param = u32::from_le_bytes([
                    header.data[1],
                    header.data[2],
                    header.data[3],
                    header.data[4],
                ]);
                Some(LinkageEntry {
                    segment,
                    mode: code % 8,
                    param,
                })
            })
            .collect()
    }
}
