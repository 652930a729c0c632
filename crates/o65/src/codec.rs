use super::*;
use tracing::warn;

pub const O65_MAGIC: &[u8; 5] = b"\x01\x00o65";
const O65_VERSION: u8 = 0;
const MODE_USE32: u16 = 0x2000;

const RELOC_LOW: u8 = 0x20;
const RELOC_HIGH: u8 = 0x40;
const RELOC_WORD: u8 = 0x80;
const RELOC_SEG: u8 = 0xA0;
const RELOC_LONG: u8 = 0xC0;
const AREA_EXTERNAL: u8 = 0;

fn needs_use32(module: &O65Module) -> bool {
    SegmentId::ALL.into_iter().any(|seg| {
        let segment = module.segment(seg);
        u64::from(segment.base) + u64::from(segment.size()) > 0xFFFF
            || segment.publics.values().any(|address| *address > 0xFFFF)
    }) || module.externs.len() > 0xFFFF
}

fn write_size(out: &mut Vec<u8>, value: u32, use32: bool) {
    if use32 {
        write_u32(out, value);
    } else {
        write_u16(out, value as u16);
    }
}

/// Encodes `module` in the legacy o65 layout.
///
/// Externals that already have a value are dropped from the undefined list;
/// their sites were patched when the value was supplied.
pub fn encode_o65(module: &O65Module) -> Result<Vec<u8>> {
    validate_module(module)?;
    let use32 = needs_use32(module);

    let mut out = Vec::new();
    out.extend_from_slice(O65_MAGIC);
    out.push(O65_VERSION);
    write_u16(&mut out, if use32 { MODE_USE32 } else { 0 });
    for seg in [SegmentId::Code, SegmentId::Data, SegmentId::Bss, SegmentId::Zero] {
        write_size(&mut out, module.base(seg), use32);
        write_size(&mut out, module.segment_size(seg), use32);
    }
    write_size(&mut out, 0, use32); // stack

    for header in &module.custom_headers {
        out.push(header.data.len() as u8 + 2);
        out.push(header.kind);
        out.extend_from_slice(&header.data);
    }
    out.push(0);

    out.extend_from_slice(&module.segment(SegmentId::Code).bytes);
    out.extend_from_slice(&module.segment(SegmentId::Data).bytes);

    let mut symbol_numbers = vec![None; module.externs.len()];
    let undefined: Vec<_> = module
        .externs
        .iter()
        .enumerate()
        .filter(|(_, sym)| sym.value.is_none())
        .collect();
    write_size(&mut out, undefined.len() as u32, use32);
    for (number, (index, sym)) in undefined.iter().enumerate() {
        symbol_numbers[*index] = Some(number as u32);
        out.extend_from_slice(sym.name.as_bytes());
        out.push(0);
    }

    for seg in [SegmentId::Bss, SegmentId::Zero] {
        let dropped = module.segment(seg).relocations.len();
        if dropped > 0 {
            warn!(
                segment = seg.name(),
                dropped,
                "relocations in an uninitialized segment cannot be encoded"
            );
        }
    }
    for seg in [SegmentId::Code, SegmentId::Data] {
        encode_relocations(&mut out, module.segment(seg), &symbol_numbers, use32)
            .with_context(|| format!("cannot encode {} relocations", seg.name()))?;
    }

    let publics: Vec<_> = SegmentId::ALL
        .into_iter()
        .flat_map(|seg| {
            module
                .segment(seg)
                .publics
                .iter()
                .map(move |(name, address)| (seg, name, *address))
        })
        .collect();
    write_size(&mut out, publics.len() as u32, use32);
    for (seg, name, address) in publics {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.push(seg.area());
        write_size(&mut out, address, use32);
    }

    Ok(out)
}

fn encode_relocations(
    out: &mut Vec<u8>,
    segment: &Segment,
    symbol_numbers: &[Option<u32>],
    use32: bool,
) -> Result<()> {
    let mut relocations = segment.relocations.clone();
    relocations.sort_by_key(|reloc| reloc.offset);

    let mut previous: i64 = -1;
    for reloc in relocations {
        let mut gap = i64::from(reloc.offset) - previous;
        previous = i64::from(reloc.offset);
        if gap <= 0 {
            bail!("two relocations share offset {:#X}", reloc.offset);
        }
        while gap > 254 {
            out.push(255);
            gap -= 254;
        }
        out.push(gap as u8);

        let kind_bits = match reloc.kind {
            RelocKind::Word => RELOC_WORD,
            RelocKind::Low => RELOC_LOW,
            RelocKind::High { .. } => RELOC_HIGH,
            RelocKind::Seg { .. } => RELOC_SEG,
            RelocKind::Long => RELOC_LONG,
        };
        match reloc.target {
            RelocTarget::Segment(seg) => out.push(kind_bits | seg.area()),
            RelocTarget::Symbol(index) => {
                let Some(number) = symbol_numbers.get(index).copied().flatten() else {
                    bail!("relocation refers to symbol #{index}, which is already resolved");
                };
                out.push(kind_bits | AREA_EXTERNAL);
                write_size(out, number, use32);
            }
        }
        match reloc.kind {
            RelocKind::High { low } => out.push(low),
            RelocKind::Seg { offset } => write_u16(out, offset),
            _ => {}
        }
    }
    out.push(0);
    Ok(())
}

pub fn decode_o65(bytes: &[u8]) -> Result<O65Module> {
    let mut rd = Reader::new(bytes);
    let magic = rd.read_exact(5)?;
    if magic != O65_MAGIC {
        bail!("invalid object magic");
    }
    let version = rd.read_u8()?;
    if version != O65_VERSION {
        bail!("unsupported o65 version {version}");
    }
    let mode = rd.read_u16()?;
    let use32 = mode & MODE_USE32 != 0;

    let mut module = O65Module::new();
    let mut sizes = [0u32; 4];
    for (slot, seg) in [SegmentId::Code, SegmentId::Data, SegmentId::Bss, SegmentId::Zero]
        .into_iter()
        .enumerate()
    {
        module.segment_mut(seg).base = rd.read_size(use32)?;
        sizes[slot] = rd.read_size(use32)?;
    }
    let _stack = rd.read_size(use32)?;

    loop {
        let option_len = rd.read_u8()?;
        if option_len == 0 {
            break;
        }
        if option_len == 1 {
            bail!("invalid o65 option length: 1");
        }
        let kind = rd.read_u8()?;
        let data = rd.read_exact(usize::from(option_len - 2))?.to_vec();
        module.custom_headers.push(CustomHeader { kind, data });
    }

    let text = rd.read_exact(sizes[0] as usize)?;
    module.load_segment_from(SegmentId::Code, text);
    let data = rd.read_exact(sizes[1] as usize)?;
    module.load_segment_from(SegmentId::Data, data);
    module.resize(SegmentId::Bss, sizes[2]);
    module.resize(SegmentId::Zero, sizes[3]);

    let undefined_count = rd.read_size(use32)?;
    for _ in 0..undefined_count {
        let name = rd.read_cstring()?;
        module.externs.push(ExternSymbol { name, value: None });
    }

    for seg in [SegmentId::Code, SegmentId::Data] {
        let relocations = decode_relocations(&mut rd, module.externs.len(), use32)
            .with_context(|| format!("corrupt {} relocation table", seg.name()))?;
        module.segment_mut(seg).relocations = relocations;
    }

    let export_count = rd.read_size(use32)?;
    for _ in 0..export_count {
        let name = rd.read_cstring()?;
        let area = rd.read_u8()?;
        let address = rd.read_size(use32)?;
        let Some(seg) = SegmentId::from_area(area) else {
            bail!("export '{name}' has invalid segment {area}");
        };
        module.declare_global(seg, &name, address);
    }

    validate_module(&module)?;
    Ok(module)
}

fn decode_relocations(rd: &mut Reader<'_>, symbol_count: usize, use32: bool) -> Result<Vec<Relocation>> {
    let mut relocations = Vec::new();
    let mut address: i64 = -1;
    loop {
        let step = rd.read_u8()?;
        match step {
            0 => break,
            255 => {
                address += 254;
                continue;
            }
            _ => address += i64::from(step),
        }

        let tag = rd.read_u8()?;
        let area = tag & 7;
        let target = if area == AREA_EXTERNAL {
            let number = rd.read_size(use32)? as usize;
            if number >= symbol_count {
                bail!("relocation refers to undefined symbol #{number}");
            }
            RelocTarget::Symbol(number)
        } else {
            let Some(seg) = SegmentId::from_area(area) else {
                bail!("invalid relocation area {area}");
            };
            RelocTarget::Segment(seg)
        };
        let kind = match tag & 0xE0 {
            RELOC_WORD => RelocKind::Word,
            RELOC_LOW => RelocKind::Low,
            RELOC_HIGH => RelocKind::High { low: rd.read_u8()? },
            RELOC_SEG => RelocKind::Seg {
                offset: rd.read_u16()?,
            },
            RELOC_LONG => RelocKind::Long,
            other => bail!("invalid relocation type {other:#04X}"),
        };
        let offset = u32::try_from(address).context("relocation offset out of range")?;
        relocations.push(Relocation {
            offset,
            kind,
            target,
        });
    }
    Ok(relocations)
}
