use assert_cmd::Command;
use predicates::str::contains;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_root(name: &str) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should move forward")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("nes65-cli-{name}-{unique}"));
    std::fs::create_dir_all(&root).expect("failed to create temp root");
    root
}

fn nes65() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nes65"))
}

fn compile(source: &Path, object: &Path) {
    nes65()
        .arg("compile")
        .arg(source)
        .arg("-o")
        .arg(object)
        .assert()
        .success();
}

/// File offset of a CPU address in a two-bank ROM.
fn rom_offset(address: u16) -> usize {
    let address = usize::from(address);
    if address >= 0xC000 {
        address - 0xC000 + 0x4000
    } else {
        address - 0x8000
    }
}

#[test]
fn help_flag_prints_help() {
    nes65()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("6502 assembler and O65 linker"))
        .stdout(contains("compile"))
        .stdout(contains("link"));
}

#[test]
fn compile_and_link_into_a_raw_rom() {
    let root = temp_root("raw");
    let main = root.join("main.s");
    let sub = root.join("sub.s");
    std::fs::write(&main, "jsr sub\nrts\n").expect("failed to write main");
    std::fs::write(&sub, "sub lda #1\nrts\n").expect("failed to write sub");
    compile(&main, &root.join("main.o65"));
    compile(&sub, &root.join("sub.o65"));

    let out_file = root.join("game.bin");
    nes65()
        .arg("link")
        .arg(root.join("main.o65"))
        .arg(root.join("sub.o65"))
        .arg("-f")
        .arg("raw")
        .arg("-s")
        .arg("32768")
        .arg("-o")
        .arg(&out_file)
        .assert()
        .success();

    let rom = std::fs::read(&out_file).expect("read rom");
    assert_eq!(rom.len(), 0x8000);
    let jsr = rom.iter().position(|byte| *byte == 0x20).expect("jsr in rom");
    let target = u16::from_le_bytes([rom[jsr + 1], rom[jsr + 2]]);
    assert_eq!(rom[jsr + 3], 0x60);
    assert_eq!(&rom[rom_offset(target)..rom_offset(target) + 3], &[0xA9, 0x01, 0x60]);
}

#[test]
fn nes_output_is_the_default() {
    let root = temp_root("nes");
    let source = root.join("reset.s");
    std::fs::write(&source, "nop\n").expect("failed to write source");
    compile(&source, &root.join("reset.o65"));

    nes65()
        .arg("link")
        .arg(root.join("reset.o65"))
        .arg("-s")
        .arg("$4000")
        .assert()
        .success();
    let rom = std::fs::read(root.join("reset.nes")).expect("default output");
    assert_eq!(rom.len(), 16 + 0x4000);
    assert_eq!(&rom[..4], b"NES\x1A");
    assert_eq!(rom[4], 1);
}

#[test]
fn odd_rom_size_is_rounded_down_with_a_warning() {
    let root = temp_root("romsize");
    let source = root.join("tiny.s");
    std::fs::write(&source, "nop\n").expect("failed to write source");
    compile(&source, &root.join("tiny.o65"));

    let out_file = root.join("tiny.nes");
    nes65()
        .arg("link")
        .arg(root.join("tiny.o65"))
        .arg("-s")
        .arg("20000")
        .arg("-o")
        .arg(&out_file)
        .assert()
        .success()
        .stderr(contains("is not a multiple of"));
    let rom = std::fs::read(&out_file).expect("read rom");
    assert_eq!(rom.len(), 16 + 0x4000);
}

#[test]
fn undefined_symbols_fail_but_still_write_output() {
    let root = temp_root("undefined");
    let source = root.join("lonely.s");
    std::fs::write(&source, "jmp nowhere\n").expect("failed to write source");
    compile(&source, &root.join("lonely.o65"));

    let out_file = root.join("lonely.bin");
    nes65()
        .arg("link")
        .arg(root.join("lonely.o65"))
        .arg("-f")
        .arg("raw")
        .arg("-o")
        .arg(&out_file)
        .assert()
        .failure()
        .stderr(contains("symbol 'nowhere' is still undefined"));
    assert!(out_file.exists());
}

#[test]
fn link_defines_resolve_externals() {
    let root = temp_root("defines");
    let source = root.join("ppu.s");
    std::fs::write(&source, "sta PPUCTRL\n").expect("failed to write source");
    compile(&source, &root.join("ppu.o65"));

    let out_file = root.join("ppu.bin");
    nes65()
        .arg("link")
        .arg(root.join("ppu.o65"))
        .arg("-f")
        .arg("raw")
        .arg("-s")
        .arg("16384")
        .arg("-D")
        .arg("PPUCTRL=$2000")
        .arg("-o")
        .arg(&out_file)
        .assert()
        .success();
    let rom = std::fs::read(&out_file).expect("read rom");
    assert_eq!(&rom[..3], &[0x8D, 0x00, 0x20]);
}

#[test]
fn config_file_selects_the_format() {
    let root = temp_root("config");
    let source = root.join("patch.s");
    std::fs::write(&source, "rts\n").expect("failed to write source");
    compile(&source, &root.join("patch.o65"));
    let config = root.join("link.ron");
    std::fs::write(&config, "(format: Ips, rom_pages: 2)").expect("failed to write config");

    let out_file = root.join("patch.ips");
    nes65()
        .arg("link")
        .arg(root.join("patch.o65"))
        .arg("-T")
        .arg(&config)
        .arg("-o")
        .arg(&out_file)
        .assert()
        .success();
    let bytes = std::fs::read(&out_file).expect("read patch");
    assert!(bytes.starts_with(b"PATCH"));
    assert!(bytes.ends_with(b"EOF"));
}

#[test]
fn bad_config_is_reported() {
    let root = temp_root("bad-config");
    let source = root.join("x.s");
    std::fs::write(&source, "rts\n").expect("failed to write source");
    compile(&source, &root.join("x.o65"));
    let config = root.join("link.ron");
    std::fs::write(&config, "(colour: Blue)").expect("failed to write config");

    nes65()
        .arg("link")
        .arg(root.join("x.o65"))
        .arg("-T")
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("failed to parse linker config"));
}

#[test]
fn missing_link_input_is_reported() {
    let root = temp_root("missing");
    let out_file = root.join("out.bin");
    nes65()
        .arg("link")
        .arg(root.join("absent.o65"))
        .arg("-f")
        .arg("raw")
        .arg("-o")
        .arg(&out_file)
        .assert()
        .failure()
        .stderr(contains("failed to read"));
    assert!(out_file.exists());
}

#[test]
fn compile_defines_and_listing() {
    let root = temp_root("listing");
    let source = root.join("count.s");
    std::fs::write(&source, "*=$8000\nlda #COUNT\n").expect("failed to write source");

    nes65()
        .arg("compile")
        .arg(&source)
        .arg("-D")
        .arg("COUNT=5")
        .arg("--listing")
        .assert()
        .success()
        .stdout(contains("lda #$05"));
    assert!(root.join("count.o65").exists());
}

#[test]
fn compile_to_ips() {
    let root = temp_root("ips");
    let source = root.join("hook.s");
    std::fs::write(&source, "*=$C000\njmp handler\n").expect("failed to write source");
    let out_file = root.join("hook.ips");

    nes65()
        .arg("compile")
        .arg(&source)
        .arg("-f")
        .arg("ips")
        .arg("-o")
        .arg(&out_file)
        .assert()
        .success();
    let bytes = std::fs::read(&out_file).expect("read patch");
    assert!(bytes.starts_with(b"PATCH"));
    assert!(bytes.windows(7).any(|window| window == b"handler"));
}

#[test]
fn compile_errors_still_write_the_object() {
    let root = temp_root("errors");
    let source = root.join("broken.s");
    std::fs::write(&source, "nop\n.bogus 1\nrts\n").expect("failed to write source");
    let object = root.join("broken.o65");

    nes65()
        .arg("compile")
        .arg(&source)
        .arg("-o")
        .arg(&object)
        .assert()
        .failure()
        .stderr(contains("unknown directive"));
    assert!(object.exists());
}

#[test]
fn unreadable_sources_do_not_stop_the_others() {
    let root = temp_root("partial");
    let source = root.join("present.s");
    std::fs::write(&source, "rts\n").expect("failed to write source");
    let object = root.join("partial.o65");

    nes65()
        .arg("compile")
        .arg(root.join("absent.s"))
        .arg(&source)
        .arg("-o")
        .arg(&object)
        .assert()
        .failure()
        .stderr(contains("cannot read"));
    assert!(object.exists());
}
