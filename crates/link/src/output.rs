use anyhow::{Context, Result};
use indexmap::IndexMap;
use nes65_o65::{DataArea, IpsPatch, NesHeader, O65Module, SegmentId, encode_ips, encode_o65};
use tracing::{debug, warn};

use crate::config::{LinkerConfig, OutputFormat};
use crate::linker::Linker;
use crate::romaddr::RomMap;

/// Unit in which CPU addresses are mapped back into the ROM file.
const GRANULE: u32 = 0x2000;

const ROM_SEGMENTS: [SegmentId; 2] = [SegmentId::Code, SegmentId::Data];

/// The placed segments of every module, merged per segment, with the labels
/// that name them.
#[derive(Debug, Clone, Default)]
pub struct LinkedImage {
    areas: [DataArea; 4],
    labels: IndexMap<String, (u32, SegmentId)>,
}

impl LinkedImage {
    /// Each non-empty placed segment becomes `object_<n>_<SEG>`, numbered
    /// from 1 in module order. Module publics follow.
    pub fn collect(linker: &Linker) -> Self {
        let mut image = Self::default();
        for seg in SegmentId::ALL {
            let addrs = linker.addr_list(seg);
            for (index, address) in addrs.iter().enumerate() {
                let Some(address) = *address else {
                    continue;
                };
                let bytes = linker.segment(seg, index);
                if !bytes.is_empty() {
                    let label = format!("object_{}_{}", index + 1, seg.name());
                    image.labels.insert(label, (address, seg));
                    image.areas[seg.index()].write_lump(address, bytes);
                }
                for (name, value) in &linker.module(index).segment(seg).publics {
                    image.labels.entry(name.clone()).or_insert((*value, seg));
                }
            }
        }
        image
    }

    pub fn area(&self, seg: SegmentId) -> &DataArea {
        &self.areas[seg.index()]
    }

    pub fn label(&self, name: &str) -> Option<u32> {
        self.labels.get(name).map(|(address, _)| *address)
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, u32, SegmentId)> + '_ {
        self.labels
            .iter()
            .map(|(name, (address, seg))| (name.as_str(), *address, *seg))
    }
}

pub fn render(image: &LinkedImage, config: &LinkerConfig) -> Result<Vec<u8>> {
    let map = RomMap::new(config.rom_pages);
    match config.format {
        OutputFormat::Ips => render_ips(image),
        OutputFormat::O65 => render_o65(image),
        OutputFormat::Raw => Ok(render_rom(image, map)),
        OutputFormat::Nes => Ok(render_nes(image, config)),
    }
}

/// CODE and DATA as data records at their CPU addresses, every label as a
/// global record.
pub fn render_ips(image: &LinkedImage) -> Result<Vec<u8>> {
    let mut patch = IpsPatch::default();
    for seg in ROM_SEGMENTS {
        for (address, bytes) in image.area(seg).blobs() {
            patch.add_data(address, bytes);
        }
    }
    for (name, address, _) in image.labels() {
        patch.add_global(name, address);
    }
    encode_ips(&patch).context("failed to encode IPS output")
}

/// One module holding every segment from its lowest to its highest address.
pub fn render_o65(image: &LinkedImage) -> Result<Vec<u8>> {
    let mut module = O65Module::new();
    for seg in SegmentId::ALL {
        let area = image.area(seg);
        if let Some(base) = area.base() {
            module.load_segment_from(seg, &area.content());
            module.segment_mut(seg).base = base;
        }
    }
    for (name, address, seg) in image.labels() {
        let area = image.area(seg);
        let inside = area
            .base()
            .zip(area.top())
            .is_some_and(|(base, top)| (base..=top).contains(&address));
        if !inside {
            warn!(label = name, segment = seg.name(), "label outside its segment is left out");
            continue;
        }
        module.declare_global(seg, name, address);
    }
    encode_o65(&module).context("failed to encode o65 output")
}

/// CODE and DATA mapped back to ROM file offsets, padded to the ROM size.
pub fn render_rom(image: &LinkedImage, map: RomMap) -> Vec<u8> {
    let mut rom = DataArea::new();
    for seg in ROM_SEGMENTS {
        for (address, bytes) in image.area(seg).blobs() {
            map_into_rom(&mut rom, map, address, bytes);
        }
    }
    let size = rom.top().unwrap_or(0).max(map.rom_size());
    rom.content_range(0, size)
}

pub fn render_nes(image: &LinkedImage, config: &LinkerConfig) -> Vec<u8> {
    let map = RomMap::new(config.rom_pages);
    let header = NesHeader {
        prg_pages: u8::try_from(map.pages()).unwrap_or(u8::MAX),
        chr_pages: 0,
        mapper: config.mapper,
        mirroring: config.mirroring.header_bit(),
    };
    let mut out = header.encode().to_vec();
    out.extend(render_rom(image, map));
    out
}

/// All-zero granules are skipped so they never cover bytes placed earlier.
fn map_into_rom(rom: &mut DataArea, map: RomMap, address: u32, bytes: &[u8]) {
    if address & 0xFFFF < 0x8000 {
        warn!(
            address = format_args!("${address:06X}"),
            size = bytes.len(),
            "bytes outside cartridge ROM are left out"
        );
        return;
    }
    let mut address = address;
    let mut rest = bytes;
    while !rest.is_empty() {
        let granule_end = (address / GRANULE + 1) * GRANULE;
        let count = rest.len().min((granule_end - address) as usize);
        let (lump, tail) = rest.split_at(count);
        if lump.iter().any(|byte| *byte != 0) {
            let target = map.nes_to_rom(address);
            debug!(
                base = format_args!("${address:06X}"),
                write_to = format_args!("${target:X}"),
                count,
                "mapping into ROM"
            );
            rom.write_lump(target, lump);
        }
        address += count as u32;
        rest = tail;
    }
}
