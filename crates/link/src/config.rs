use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

use crate::romaddr::PAGE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkerConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_rom_pages")]
    pub rom_pages: u32,
    #[serde(default = "default_mapper")]
    pub mapper: u8,
    #[serde(default)]
    pub mirroring: Mirroring,
    #[serde(default = "default_zero_page")]
    pub zero_page: AddressRange,
    #[serde(default = "default_bss")]
    pub bss: Vec<AddressRange>,
    /// ROM offsets available to CODE and DATA. The whole ROM when absent.
    #[serde(default)]
    pub free_space: Option<Vec<AddressRange>>,
    #[serde(default)]
    pub defines: Vec<LinkSymbol>,
}

fn default_rom_pages() -> u32 {
    16
}

fn default_mapper() -> u8 {
    2
}

fn default_zero_page() -> AddressRange {
    AddressRange {
        start: 0x00,
        end: 0x100,
    }
}

fn default_bss() -> Vec<AddressRange> {
    vec![AddressRange {
        start: 0x200,
        end: 0x800,
    }]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum OutputFormat {
    Ips,
    O65,
    Raw,
    #[default]
    Nes,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ips => "ips",
            Self::O65 => "o65",
            Self::Raw => "raw",
            Self::Nes => "nes",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Mirroring {
    Horizontal,
    #[default]
    Vertical,
}

impl Mirroring {
    pub fn header_bit(self) -> u8 {
        match self {
            Self::Horizontal => 0,
            Self::Vertical => 1,
        }
    }
}

/// Half-open range `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddressRange {
    pub start: u32,
    pub end: u32,
}

impl AddressRange {
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkSymbol {
    pub name: String,
    pub value: u32,
}

pub fn load_config(path: &Path) -> Result<LinkerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read linker config '{}'", path.display()))?;
    let config: LinkerConfig = ron::from_str(&text)
        .with_context(|| format!("failed to parse linker config '{}'", path.display()))?;
    validate_config(&config)
        .with_context(|| format!("invalid linker config '{}'", path.display()))?;
    Ok(config)
}

pub fn default_config() -> LinkerConfig {
    LinkerConfig {
        format: OutputFormat::default(),
        rom_pages: default_rom_pages(),
        mapper: default_mapper(),
        mirroring: Mirroring::default(),
        zero_page: default_zero_page(),
        bss: default_bss(),
        free_space: None,
        defines: Vec::new(),
    }
}

pub fn validate_config(config: &LinkerConfig) -> Result<()> {
    if config.rom_pages == 0 || config.rom_pages > 0xFF {
        bail!("rom_pages must be between 1 and 255, got {}", config.rom_pages);
    }
    if config.zero_page.start > config.zero_page.end || config.zero_page.end > 0x100 {
        bail!(
            "zero page range ${:X}..${:X} must lie within $00..$100",
            config.zero_page.start,
            config.zero_page.end
        );
    }
    for (index, range) in config.bss.iter().enumerate() {
        if range.start > range.end {
            bail!("bss range at index {index} ends before it starts");
        }
    }
    let rom_size = config.rom_pages * PAGE_SIZE;
    for (index, range) in config.free_space.iter().flatten().enumerate() {
        if range.start > range.end {
            bail!("free space range at index {index} ends before it starts");
        }
        if range.end > rom_size {
            bail!(
                "free space range at index {index} ends at ${:X}, past the ${rom_size:X} byte ROM",
                range.end
            );
        }
    }
    for (index, symbol) in config.defines.iter().enumerate() {
        if symbol.name.trim().is_empty() {
            bail!("define at index {index} must have a name");
        }
    }
    Ok(())
}
