use super::*;
use crate::wire::{write_bytes as write_blob, write_string};

pub const FRAGMENT_MAGIC: &[u8; 4] = b"Unza";
const FRAGMENT_VERSION: u16 = 1;

const TARGET_IMPORT: u8 = 0;
const TARGET_SECTION: u8 = 1;

/// Interns strings so that every table refers to names by index.
#[derive(Default)]
struct StringPool {
    strings: IndexMap<String, ()>,
}

impl StringPool {
    fn intern(&mut self, value: &str) -> u32 {
        let (index, _) = self.strings.insert_full(value.to_string(), ());
        index as u32
    }
}

fn kind_code(kind: RelocKind) -> (u8, u16) {
    match kind {
        RelocKind::Word => (0, 0),
        RelocKind::Low => (1, 0),
        RelocKind::High { low } => (2, u16::from(low)),
        RelocKind::Seg { offset } => (3, offset),
        RelocKind::Long => (4, 0),
    }
}

fn kind_from_code(code: u8, extra: u16) -> Result<RelocKind> {
    Ok(match code {
        0 => RelocKind::Word,
        1 => RelocKind::Low,
        2 => RelocKind::High { low: extra as u8 },
        3 => RelocKind::Seg { offset: extra },
        4 => RelocKind::Long,
        other => bail!("invalid relocation kind: {other}"),
    })
}

fn segment_from_index(index: u32) -> Result<SegmentId> {
    usize::try_from(index)
        .ok()
        .and_then(|index| SegmentId::ALL.get(index).copied())
        .with_context(|| format!("invalid section index {index}"))
}

fn segment_index(seg: SegmentId) -> u32 {
    SegmentId::ALL
        .iter()
        .position(|candidate| *candidate == seg)
        .unwrap_or_default() as u32
}

/// Encodes the module as a fragment object.
///
/// Unlike o65, fragments keep relocations of every segment, resolved
/// imports and debug symbols.
pub fn encode_fragment(module: &O65Module) -> Result<Vec<u8>> {
    validate_module(module)?;
    let mut pool = StringPool::default();
    let mut tables = Vec::new();

    // Sections.
    write_u32(&mut tables, SegmentId::ALL.len() as u32);
    for seg in SegmentId::ALL {
        let segment = module.segment(seg);
        write_u32(&mut tables, pool.intern(seg.name()));
        write_u32(&mut tables, segment.base);
        write_u32(&mut tables, segment.size());
        if seg.has_contents() {
            tables.push(1);
            write_blob(&mut tables, &segment.bytes)?;
        } else {
            tables.push(0);
        }
    }

    // Exports.
    let exports: Vec<_> = SegmentId::ALL
        .into_iter()
        .flat_map(|seg| {
            module
                .segment(seg)
                .publics
                .iter()
                .map(move |(name, address)| (seg, name, *address))
        })
        .collect();
    write_u32(&mut tables, exports.len() as u32);
    for (seg, name, address) in exports {
        write_u32(&mut tables, pool.intern(name));
        write_u32(&mut tables, segment_index(seg));
        write_u32(&mut tables, address);
    }

    // Imports.
    write_u32(&mut tables, module.externs.len() as u32);
    for sym in &module.externs {
        write_u32(&mut tables, pool.intern(&sym.name));
        match sym.value {
            Some(value) => {
                tables.push(1);
                write_u32(&mut tables, value);
            }
            None => tables.push(0),
        }
    }

    // Relocations.
    let relocations: Vec<_> = SegmentId::ALL
        .into_iter()
        .flat_map(|seg| module.segment(seg).relocations.iter().map(move |r| (seg, r)))
        .collect();
    write_u32(&mut tables, relocations.len() as u32);
    for (seg, reloc) in relocations {
        write_u32(&mut tables, segment_index(seg));
        write_u32(&mut tables, reloc.offset);
        let (code, extra) = kind_code(reloc.kind);
        tables.push(code);
        write_u16(&mut tables, extra);
        match reloc.target {
            RelocTarget::Symbol(index) => {
                tables.push(TARGET_IMPORT);
                write_u32(&mut tables, index as u32);
            }
            RelocTarget::Segment(target) => {
                tables.push(TARGET_SECTION);
                write_u32(&mut tables, segment_index(target));
            }
        }
    }

    // Debug symbols.
    write_u32(&mut tables, module.debug_symbols.len() as u32);
    for sym in &module.debug_symbols {
        write_u32(&mut tables, pool.intern(&sym.name));
        match sym.segment {
            Some(seg) => write_u32(&mut tables, segment_index(seg)),
            None => write_u32(&mut tables, u32::MAX),
        }
        write_u32(&mut tables, sym.address);
    }

    // Custom headers.
    write_u32(&mut tables, module.custom_headers.len() as u32);
    for header in &module.custom_headers {
        tables.push(header.kind);
        write_blob(&mut tables, &header.data)?;
    }

    let mut out = Vec::with_capacity(tables.len() + 64);
    out.extend_from_slice(FRAGMENT_MAGIC);
    write_u16(&mut out, FRAGMENT_VERSION);
    write_u32(&mut out, pool.strings.len() as u32);
    for name in pool.strings.keys() {
        write_string(&mut out, name)?;
    }
    out.extend_from_slice(&tables);
    Ok(out)
}

pub fn decode_fragment(bytes: &[u8]) -> Result<O65Module> {
    let mut rd = Reader::new(bytes);
    if rd.read_exact(4)? != FRAGMENT_MAGIC {
        bail!("invalid fragment magic");
    }
    let version = rd.read_u16()?;
    if version != FRAGMENT_VERSION {
        bail!("unsupported fragment version: {version}");
    }

    let string_count = rd.read_u32()? as usize;
    let mut strings = Vec::with_capacity(string_count.min(4096));
    for _ in 0..string_count {
        strings.push(rd.read_string()?);
    }
    let string = |index: u32| -> Result<String> {
        strings
            .get(index as usize)
            .cloned()
            .with_context(|| format!("string index {index} out of range"))
    };

    let mut module = O65Module::new();

    let section_count = rd.read_u32()?;
    for _ in 0..section_count {
        let name = string(rd.read_u32()?)?;
        let Some(seg) = SegmentId::ALL.into_iter().find(|seg| seg.name() == name) else {
            bail!("unknown section '{name}'");
        };
        let base = rd.read_u32()?;
        let size = rd.read_u32()?;
        let segment = module.segment_mut(seg);
        segment.base = base;
        if rd.read_u8()? != 0 {
            segment.bytes = rd.read_bytes()?;
            if segment.size() != size {
                bail!("section '{name}' size mismatch");
            }
        } else {
            segment.bytes = vec![0; size as usize];
        }
    }

    let export_count = rd.read_u32()?;
    for _ in 0..export_count {
        let name = string(rd.read_u32()?)?;
        let seg = segment_from_index(rd.read_u32()?)?;
        let address = rd.read_u32()?;
        module.declare_global(seg, &name, address);
    }

    let import_count = rd.read_u32()?;
    for _ in 0..import_count {
        let name = string(rd.read_u32()?)?;
        let value = if rd.read_u8()? != 0 {
            Some(rd.read_u32()?)
        } else {
            None
        };
        module.externs.push(ExternSymbol { name, value });
    }

    let reloc_count = rd.read_u32()?;
    for _ in 0..reloc_count {
        let seg = segment_from_index(rd.read_u32()?)?;
        let offset = rd.read_u32()?;
        let code = rd.read_u8()?;
        let extra = rd.read_u16()?;
        let kind = kind_from_code(code, extra)?;
        let target = match rd.read_u8()? {
            TARGET_IMPORT => RelocTarget::Symbol(rd.read_u32()? as usize),
            TARGET_SECTION => RelocTarget::Segment(segment_from_index(rd.read_u32()?)?),
            other => bail!("invalid relocation target kind: {other}"),
        };
        module.segment_mut(seg).relocations.push(Relocation {
            offset,
            kind,
            target,
        });
    }

    let debug_count = rd.read_u32()?;
    for _ in 0..debug_count {
        let name = string(rd.read_u32()?)?;
        let segment = match rd.read_u32()? {
            u32::MAX => None,
            index => Some(segment_from_index(index)?),
        };
        let address = rd.read_u32()?;
        module.debug_symbols.push(DebugSymbol {
            name,
            segment,
            address,
        });
    }

    let header_count = rd.read_u32()?;
    for _ in 0..header_count {
        let kind = rd.read_u8()?;
        let data = rd.read_bytes()?;
        module.custom_headers.push(CustomHeader { kind, data });
    }

    if !rd.is_eof() {
        bail!("fragment has trailing bytes at offset {}", rd.position());
    }
    validate_module(&module)?;
    Ok(module)
}
