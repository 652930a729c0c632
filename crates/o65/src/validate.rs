use super::*;

/// Checks that every relocation site and export lies inside its segment.
pub(super) fn validate_module(module: &O65Module) -> Result<()> {
    for seg in SegmentId::ALL {
        let segment = module.segment(seg);
        for reloc in &segment.relocations {
            let end = reloc.offset as usize + reloc.kind.width();
            if end > segment.bytes.len() {
                bail!(
                    "relocation site {:#X}..{:#X} is outside segment {} ({} bytes)",
                    reloc.offset,
                    end,
                    seg.name(),
                    segment.bytes.len()
                );
            }
            if let RelocTarget::Symbol(index) = reloc.target
                && index >= module.externs.len()
            {
                bail!(
                    "relocation at {}:{:#X} references unknown symbol #{index}",
                    seg.name(),
                    reloc.offset
                );
            }
        }

        let end = u64::from(segment.base) + segment.bytes.len() as u64;
        for (name, address) in &segment.publics {
            if u64::from(*address) < u64::from(segment.base) || u64::from(*address) > end {
                bail!(
                    "symbol '{name}' address {address:#X} is outside segment {}",
                    seg.name()
                );
            }
        }
    }

    for header in &module.custom_headers {
        if header.data.len() > 253 {
            bail!("custom header type {} is too long", header.kind);
        }
    }
    Ok(())
}
