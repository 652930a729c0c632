use crate::DataArea;

/// Flat image of `area` starting at `origin`, padded with zero to `min_size`.
pub fn render_raw(area: &DataArea, origin: u32, min_size: usize) -> Vec<u8> {
    let top = area.top().unwrap_or(origin).max(origin);
    let end = top.max(origin.saturating_add(min_size as u32));
    area.content_range(origin, end)
}

/// 16-byte iNES header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NesHeader {
    /// Number of 16 KiB PRG pages.
    pub prg_pages: u8,
    pub chr_pages: u8,
    pub mapper: u8,
    /// 0 horizontal, 1 vertical.
    pub mirroring: u8,
}

impl NesHeader {
    pub const SIZE: usize = 16;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..4].copy_from_slice(b"NES\x1A");
        out[4] = self.prg_pages;
        out[5] = self.chr_pages;
        out[6] = ((self.mapper & 0x0F) << 4) | (self.mirroring & 1);
        out[7] = self.mapper & 0xF0;
        out
    }
}
