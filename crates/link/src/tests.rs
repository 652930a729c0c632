use super::*;
use nes65_o65::{O65Module, RelocKind, SegmentId, encode_o65};

fn code_module(bytes: &[u8]) -> O65Module {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, bytes);
    module
}

fn object_input(name: &str, module: &O65Module) -> LinkInput {
    LinkInput::new(name, encode_o65(module).expect("encode object"))
}

fn small_config(format: OutputFormat) -> LinkerConfig {
    LinkerConfig {
        format,
        rom_pages: 2,
        ..default_config()
    }
}

mod config;
mod output;
