use anyhow::{Context, Result, bail};
use indexmap::IndexMap;

mod area;
mod codec;
mod fragment;
mod io;
mod ips;
mod model;
mod raw;
mod validate;
mod wire;

pub use area::DataArea;
pub use codec::{O65_MAGIC, decode_o65, encode_o65};
pub use fragment::{FRAGMENT_MAGIC, decode_fragment, encode_fragment};
pub use io::{decode_object, read_object, write_bytes};
pub use ips::{IPS_MAGIC, IpsPatch, IpsRecord, decode_ips, encode_ips};
pub use model::{
    CustomHeader, DebugSymbol, ExternSymbol, LINK_ANYWHERE, LINK_HERE, LINK_IN_GROUP,
    LINK_THIS_PAGE, LINKAGE_HEADER, LinkageEntry, O65Module, RelocKind,
    RelocTarget, Relocation, Segment, SegmentId, SymbolError,
};
pub use raw::{NesHeader, render_raw};

use validate::validate_module;
use wire::{Reader, write_u16, write_u32};

#[cfg(test)]
mod tests;
