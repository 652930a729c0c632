use std::fmt::Write as _;

use nes65_isa6502::{decode_instruction, format_instruction};
use nes65_o65::SegmentId;

use crate::driver::Assembly;

const BYTES_COLUMN: usize = 10;
const TEXT_COLUMN: usize = 16;

/// Disassembly of the CODE segment, one line per instruction, each
/// followed by the statement that produced it.
pub fn render_listing(assembly: &Assembly) -> String {
    let area = assembly.object.area(SegmentId::Code);
    let mut out = String::new();

    for placement in &assembly.placements {
        if placement.segment != SegmentId::Code {
            continue;
        }
        let source = assembly
            .source_map
            .get(placement.span.source_id)
            .map(|file| file.slice(placement.span).trim())
            .unwrap_or_default();
        let end = placement.address + placement.size;
        let bytes = area.content_range(placement.address, end);

        let mut offset = 0;
        let mut first = true;
        while offset < bytes.len() {
            let address = placement.address + offset as u32;
            let rest = &bytes[offset..];
            let (len, text) = match decode_instruction(rest) {
                Ok(decoded) if placement.instruction => {
                    (decoded.len(), format_instruction(&decoded, address))
                }
                _ => (1, format!(".byt ${:02X}", rest[0])),
            };

            let hex = rest[..len]
                .iter()
                .map(|byte| format!("{byte:02X}"))
                .collect::<Vec<_>>()
                .join(" ");
            let _ = write!(
                out,
                "{address:04X}  {hex:<hex_width$}{text:<text_width$}",
                hex_width = BYTES_COLUMN,
                text_width = TEXT_COLUMN
            );
            if first {
                let _ = write!(out, "; {source}");
                first = false;
            }
            out.truncate(out.trim_end().len());
            out.push('\n');
            offset += len;
        }
    }
    out
}
