mod binpack;
mod config;
mod linker;
mod output;
mod pipeline;
mod rangeset;
mod refer;
mod romaddr;
mod space;

pub use binpack::pack_bins;
pub use config::{
    AddressRange, LinkSymbol, LinkerConfig, Mirroring, OutputFormat, default_config, load_config,
    validate_config,
};
pub use linker::{Clash, Duplicate, LinkError, LinkReport, Linker, LinkageWish};
pub use output::{LinkedImage, render, render_ips, render_nes, render_o65, render_rom};
pub use pipeline::{LinkInput, LinkOutput, link_files, link_inputs};
pub use rangeset::RangeSet;
pub use refer::ReferMethod;
pub use romaddr::{PAGE_SIZE, RomMap};
pub use space::{AddressSpace, FreeSpaceMap, FreeSpaceRecord, SpaceError, whole_rom};

#[cfg(test)]
mod tests;
