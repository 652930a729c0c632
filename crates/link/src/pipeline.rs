use anyhow::{Context, Result};
use nes65_o65::{
    IPS_MAGIC, LINK_ANYWHERE, LINK_HERE, LINK_IN_GROUP, LINK_THIS_PAGE, O65Module, SegmentId,
    decode_ips, decode_object,
};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::{LinkerConfig, OutputFormat, validate_config};
use crate::linker::{LinkReport, Linker, LinkageWish};
use crate::output::{LinkedImage, render};
use crate::romaddr::{PAGE_SIZE, RomMap};
use crate::space::{AddressSpace, FreeSpaceMap, whole_rom};

/// One file handed to the linker.
#[derive(Debug, Clone)]
pub struct LinkInput {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl LinkInput {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        Ok(Self::new(path.display().to_string(), bytes))
    }
}

#[derive(Debug, Clone)]
pub struct LinkOutput {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub report: LinkReport,
    /// Inputs that were left out, with the reason.
    pub rejected: Vec<(String, String)>,
}

impl LinkOutput {
    pub fn has_errors(&self) -> bool {
        self.report.has_errors() || !self.rejected.is_empty()
    }
}

/// Reads and links `paths`. A file that cannot be read is left out and
/// reported; the rest still link.
pub fn link_files(paths: &[PathBuf], config: &LinkerConfig) -> Result<LinkOutput> {
    let mut inputs = Vec::new();
    let mut unreadable = Vec::new();
    for path in paths {
        match LinkInput::read(path) {
            Ok(input) => inputs.push(input),
            Err(error) => {
                error!("{error:#}");
                unreadable.push((path.display().to_string(), format!("{error:#}")));
            }
        }
    }
    let mut output = link_inputs(&inputs, config)?;
    unreadable.append(&mut output.rejected);
    output.rejected = unreadable;
    Ok(output)
}

/// Loads every input, places CODE and DATA in ROM, ZERO in the zero page and
/// BSS in RAM, links, and renders the configured format.
pub fn link_inputs(inputs: &[LinkInput], config: &LinkerConfig) -> Result<LinkOutput> {
    validate_config(config)?;
    let map = RomMap::new(config.rom_pages);
    let mut linker = Linker::new(map);
    for define in &config.defines {
        linker.define_symbol(&define.name, define.value)?;
    }

    let mut rejected = Vec::new();
    for input in inputs {
        if let Err(error) = load_input(&mut linker, input) {
            error!(input = %input.name, "{error:#}");
            rejected.push((input.name.clone(), format!("{error:#}")));
        }
    }
    info!(modules = linker.len(), pages = map.pages(), "placing modules");

    let mut rom_space = rom_free_space(config, map);
    dump_pages(&rom_space);
    let rom = AddressSpace::Rom(map);
    let mut unplaced = rom_space.organize_linker(&mut linker, SegmentId::Code, rom);
    unplaced += rom_space.organize_linker(&mut linker, SegmentId::Data, rom);
    dump_pages(&rom_space);
    info!("ROM {}", rom_space.report());

    // Zero page first; whatever it leaves may hold BSS too.
    let mut ram_space = FreeSpaceMap::new();
    ram_space.add_long(config.zero_page.start, config.zero_page.len());
    unplaced += ram_space.organize_linker(&mut linker, SegmentId::Zero, AddressSpace::Ram);
    for range in &config.bss {
        ram_space.add_long(range.start, range.len());
    }
    unplaced += ram_space.organize_linker(&mut linker, SegmentId::Bss, AddressSpace::Ram);
    dump_pages(&ram_space);
    if unplaced > 0 {
        warn!(unplaced, "segments were left without an address");
    }

    let report = linker.link()?;
    if report.has_errors() {
        error!(problems = report.problem_count(), "linking finished with problems");
    }
    let image = LinkedImage::collect(&linker);
    let bytes = render(&image, config)?;
    Ok(LinkOutput {
        bytes,
        format: config.format,
        report,
        rejected,
    })
}

fn load_input(linker: &mut Linker, input: &LinkInput) -> Result<()> {
    if input.bytes.starts_with(IPS_MAGIC) {
        let patch = decode_ips(&input.bytes)
            .with_context(|| format!("failed to decode '{}'", input.name))?;
        linker.load_ips(&patch, &input.name, None)?;
        return Ok(());
    }
    let module = decode_object(&input.bytes)
        .with_context(|| format!("failed to decode '{}'", input.name))?;
    let linkages = linkages_of(&module, &input.name);
    linker.add_object(module, input.name.clone(), &linkages)?;
    Ok(())
}

fn linkages_of(module: &O65Module, name: &str) -> Vec<(SegmentId, LinkageWish)> {
    module
        .linkage_wishes()
        .into_iter()
        .filter_map(|entry| {
            let wish = match entry.mode {
                LINK_ANYWHERE => LinkageWish::Anywhere,
                LINK_HERE => LinkageWish::Here(entry.param),
                LINK_IN_GROUP => LinkageWish::InGroup(entry.param),
                LINK_THIS_PAGE => LinkageWish::ThisPage(entry.param),
                mode => {
                    warn!(input = name, mode, "unknown linkage mode ignored");
                    return None;
                }
            };
            info!(input = name, segment = entry.segment.name(), "will be linked {wish}");
            Some((entry.segment, wish))
        })
        .collect()
}

/// Configured ranges are split at bank boundaries.
fn rom_free_space(config: &LinkerConfig, map: RomMap) -> FreeSpaceMap {
    let Some(ranges) = &config.free_space else {
        return whole_rom(map);
    };
    let mut space = FreeSpaceMap::new();
    for range in ranges {
        let mut start = range.start;
        while start < range.end {
            let page = start / PAGE_SIZE;
            let end = range.end.min((page + 1) * PAGE_SIZE);
            space.add(page, start % PAGE_SIZE, end - start);
            start = end;
        }
    }
    space
}

fn dump_pages(space: &FreeSpaceMap) {
    for page in space.page_list() {
        debug!("{}", space.dump_page_map(page));
    }
}
