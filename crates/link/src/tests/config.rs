use super::*;
use std::path::PathBuf;

fn temp_file(name: &str, text: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nes65-link-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join(name);
    std::fs::write(&path, text).expect("write config");
    path
}

#[test]
fn default_config_targets_a_mapper_2_nes_rom() {
    let config = default_config();
    assert_eq!(config.format, OutputFormat::Nes);
    assert_eq!(config.rom_pages, 16);
    assert_eq!(config.mapper, 2);
    assert_eq!(config.mirroring, Mirroring::Vertical);
    assert_eq!(config.zero_page, AddressRange { start: 0, end: 0x100 });
    assert_eq!(config.bss, vec![AddressRange { start: 0x200, end: 0x800 }]);
    assert_eq!(config.free_space, None);
    validate_config(&config).expect("default config is valid");
}

#[test]
fn empty_config_uses_defaults() {
    let config: LinkerConfig = ron::from_str("()").expect("parse");
    assert_eq!(config, default_config());
}

#[test]
fn full_config_parses() {
    let config: LinkerConfig = ron::from_str(
        r#"(
  format: Ips,
  rom_pages: 8,
  mapper: 0,
  mirroring: Horizontal,
  zero_page: (start: 0x10, end: 0x100),
  bss: [(start: 0x300, end: 0x400), (start: 0x6000, end: 0x8000)],
  free_space: Some([(start: 0, end: 0x100)]),
  defines: [(name: "PPUCTRL", value: 0x2000)],
)"#,
    )
    .expect("parse");
    assert_eq!(config.format, OutputFormat::Ips);
    assert_eq!(config.rom_pages, 8);
    assert_eq!(config.mapper, 0);
    assert_eq!(config.mirroring.header_bit(), 0);
    assert_eq!(config.zero_page.len(), 0xF0);
    assert_eq!(config.bss[1], AddressRange { start: 0x6000, end: 0x8000 });
    assert_eq!(config.free_space, Some(vec![AddressRange { start: 0, end: 0x100 }]));
    assert_eq!(
        config.defines,
        vec![LinkSymbol {
            name: "PPUCTRL".to_string(),
            value: 0x2000,
        }]
    );
    validate_config(&config).expect("valid");
}

#[test]
fn unknown_fields_are_rejected() {
    assert!(ron::from_str::<LinkerConfig>("(speed: 3)").is_err());
    assert!(ron::from_str::<LinkerConfig>("(zero_page: (start: 0, end: 1, step: 1))").is_err());
}

#[test]
fn validation_catches_bad_ranges() {
    let config = LinkerConfig {
        rom_pages: 0,
        ..default_config()
    };
    let err = validate_config(&config).expect_err("no pages");
    assert!(err.to_string().contains("rom_pages"));

    let config = LinkerConfig {
        zero_page: AddressRange { start: 0, end: 0x200 },
        ..default_config()
    };
    let err = validate_config(&config).expect_err("zero page too large");
    assert!(err.to_string().contains("zero page"));

    let config = LinkerConfig {
        rom_pages: 1,
        free_space: Some(vec![AddressRange { start: 0, end: 0x8000 }]),
        ..default_config()
    };
    let err = validate_config(&config).expect_err("past the ROM");
    assert!(err.to_string().contains("past the $4000 byte ROM"));
}

#[test]
fn load_config_reads_and_validates() {
    let path = temp_file("ok.ron", "(format: Raw, rom_pages: 4)");
    let config = load_config(&path).expect("load");
    assert_eq!(config.format, OutputFormat::Raw);
    assert_eq!(config.rom_pages, 4);

    let path = temp_file("bad.ron", "(rom_pages: 300)");
    let err = load_config(&path).expect_err("invalid");
    assert!(format!("{err:#}").contains("rom_pages must be between 1 and 255"));

    let missing = path.with_file_name("missing.ron");
    let err = load_config(&missing).expect_err("missing");
    assert!(err.to_string().contains("failed to read linker config"));
}
