/// Size of one switchable PRG bank.
pub const PAGE_SIZE: u32 = 0x4000;

/// Translation between PRG ROM file offsets and CPU addresses.
///
/// Every bank but the last is addressed as `bank:$8000-$BFFF`, with the bank
/// number in bits 16 and up. The last bank is fixed at `$C000-$FFFF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomMap {
    pages: u32,
}

impl Default for RomMap {
    fn default() -> Self {
        Self { pages: 16 }
    }
}

impl RomMap {
    pub fn new(pages: u32) -> Self {
        Self {
            pages: pages.max(1),
        }
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }

    pub fn rom_size(&self) -> u32 {
        self.pages * PAGE_SIZE
    }

    pub fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    fn fixed_bank(&self) -> u32 {
        self.pages - 1
    }

    pub fn make_nes(&self, bank: u32, offset: u32) -> u32 {
        if bank >= self.fixed_bank() {
            return offset | 0xC000;
        }
        (bank << 16) | offset | 0x8000
    }

    pub fn rom_to_nes(&self, rom: u32) -> u32 {
        self.make_nes(rom / PAGE_SIZE, rom % PAGE_SIZE)
    }

    /// Addresses below `$8000` are not in cartridge ROM and come back unchanged.
    pub fn nes_to_rom(&self, nes: u32) -> u32 {
        let offset = nes % PAGE_SIZE;
        match nes / PAGE_SIZE {
            0 | 1 => nes,
            3 => self.fixed_bank() * PAGE_SIZE + offset,
            _ => (nes >> 16) * PAGE_SIZE + offset,
        }
    }

    /// Bank number and offset inside the bank of a CPU address.
    pub fn split_nes(&self, nes: u32) -> (u32, u32) {
        let rom = self.nes_to_rom(nes);
        (rom / PAGE_SIZE, rom % PAGE_SIZE)
    }
}
