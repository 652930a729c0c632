use super::*;
use std::path::Path;

/// Decodes an o65 or fragment object, picking the format by its magic.
pub fn decode_object(bytes: &[u8]) -> Result<O65Module> {
    if bytes.starts_with(O65_MAGIC) {
        decode_o65(bytes)
    } else if bytes.starts_with(FRAGMENT_MAGIC) {
        decode_fragment(bytes)
    } else {
        bail!("unrecognized object format")
    }
}

pub fn read_object(path: &Path) -> Result<O65Module> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
    decode_object(&bytes).with_context(|| format!("failed to decode '{}'", path.display()))
}

pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("failed to write '{}'", path.display()))
}
