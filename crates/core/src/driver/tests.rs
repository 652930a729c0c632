use super::*;
use nes65_o65::SegmentId;

fn assemble(text: &str) -> Assembly {
    assemble_source("test.s", text, &AssembleOptions::default())
}

fn code(assembly: &Assembly) -> Vec<u8> {
    assembly.object.area(SegmentId::Code).content()
}

fn assemble_clean(text: &str) -> Assembly {
    let assembly = assemble(text);
    assert!(
        assembly.diagnostics.is_empty(),
        "unexpected diagnostics: {}",
        assembly.render_diagnostics(RenderOptions::plain())
    );
    assembly
}

fn messages(assembly: &Assembly) -> Vec<String> {
    assembly
        .diagnostics
        .iter()
        .map(|diagnostic| diagnostic.message.clone())
        .collect()
}

#[test]
fn picks_immediate_and_zero_page() {
    let assembly = assemble_clean("lda #$05\nsta $10\n");
    assert_eq!(code(&assembly), vec![0xA9, 0x05, 0x85, 0x10]);
    assert_eq!(assembly.passes, 1);
}

#[test]
fn branch_to_own_statement() {
    let assembly = assemble_clean("- nop\n- bne -\n");
    assert_eq!(code(&assembly), vec![0xEA, 0xD0, 0xFE]);
}

#[test]
fn forward_anonymous_branch() {
    let assembly = assemble_clean("bne +\nnop\n+ rts\n");
    assert_eq!(code(&assembly), vec![0xD0, 0x01, 0xEA, 0x60]);
}

#[test]
fn anonymous_runs_are_independent() {
    let assembly = assemble_clean("-- nop\n- beq --\nbne -\n");
    assert_eq!(code(&assembly), vec![0xEA, 0xF0, 0xFD, 0xD0, 0xFC]);
}

#[test]
fn forward_label_assumes_absolute_width() {
    let assembly = assemble_clean("lda later\nlater = $10\n");
    assert_eq!(code(&assembly), vec![0xAD, 0x10, 0x00]);
    assert!(assembly.object.fixups(SegmentId::Code).is_empty());
}

#[test]
fn current_address_is_the_statement_start() {
    let assembly = assemble_clean("*=$8000\njmp *\n");
    assert_eq!(code(&assembly), vec![0x4C, 0x00, 0x80]);
}

#[test]
fn far_branch_is_relaxed_into_jump() {
    let assembly = assemble_clean("beq far\n.nop 200\nfar rts\n");
    assert_eq!(assembly.passes, 2);
    let bytes = code(&assembly);
    assert_eq!(&bytes[..5], &[0xD0, 0x03, 0x4C, 0xCD, 0x00]);
    assert_eq!(bytes.len(), 5 + 200 + 1);
    assert_eq!(bytes[205], 0x60);
}

#[test]
fn branch_to_external_symbol_is_relaxed() {
    let assembly = assemble_clean("bne elsewhere\n");
    assert_eq!(code(&assembly), vec![0xF0, 0x03, 0x4C, 0x00, 0x00]);
    let externs = assembly.object.externs(SegmentId::Code);
    assert_eq!(externs.len(), 1);
    assert_eq!(externs[0].name, "elsewhere");
    assert_eq!(externs[0].address, 3);
}

#[test]
fn overflow_is_an_error_when_passes_run_out() {
    let options = AssembleOptions {
        max_passes: 1,
        ..AssembleOptions::default()
    };
    let assembly = assemble_source("test.s", "beq far\n.nop 200\nfar rts\n", &options);
    assert!(assembly.has_errors());
    assert!(messages(&assembly)[0].contains("branch target 'far' out of range"));
}

#[test]
fn command_line_defines_are_constants() {
    let options = AssembleOptions {
        defines: vec![("COUNT".to_string(), 3)],
        ..AssembleOptions::default()
    };
    let assembly = assemble_source("test.s", ".nop COUNT\n", &options);
    assert!(!assembly.has_errors());
    assert_eq!(code(&assembly), vec![0xEA; 3]);
}

#[test]
fn position_reservations_count_towards_segment_size() {
    let assembly = assemble(".zero\nptr *=*+2\ncount *=*+1\n.text\nlda ptr\n");
    assert!(!assembly.has_errors());
    let module = assembly.object.to_o65();
    assert_eq!(module.segment_size(SegmentId::Zero), 3);
    assert_eq!(module.symbol_address("count"), Some(2));
}

#[test]
fn leading_origin_does_not_grow_the_segment() {
    let assembly = assemble_clean("*=$8000\nnop\n");
    let module = assembly.object.to_o65();
    assert_eq!(module.base(SegmentId::Code), 0x8000);
    assert_eq!(module.segment_size(SegmentId::Code), 1);
}

#[test]
fn scoped_labels_shadow_outer_ones() {
    let assembly = assemble_clean(".(\nloop dex\nbne loop\n.)\nloop rts\n");
    assert_eq!(code(&assembly), vec![0xCA, 0xD0, 0xFD, 0x60]);
}

#[test]
fn forward_reference_leaves_scope() {
    let assembly = assemble_clean(".(\njmp done\n.)\ndone rts\n");
    assert_eq!(code(&assembly), vec![0x4C, 0x03, 0x00, 0x60]);
}

#[test]
fn unbalanced_scopes_are_reported() {
    let assembly = assemble(".)\n");
    assert!(messages(&assembly)[0].contains("'.)' without matching '.('"));

    let assembly = assemble(".(\nnop\n");
    assert!(messages(&assembly)[0].contains("1 scope(s) still open"));
}

#[test]
fn parse_errors_skip_only_their_statement() {
    let assembly = assemble("bogus ,,\nnop\n");
    assert!(assembly.has_errors());
    assert_eq!(code(&assembly), vec![0xEA]);
    assert!(messages(&assembly)[0].contains("what is ',,'?"));
}

#[test]
fn redefinition_is_reported() {
    let assembly = assemble("a = 1\na = 2\nlda #a\n");
    assert!(messages(&assembly)[0].contains("label 'a' is already defined"));
    assert_eq!(code(&assembly), vec![0xA9, 0x01]);
}

#[test]
fn negative_nop_count_is_rejected() {
    let assembly = assemble(".nop -1\n");
    assert!(messages(&assembly)[0].contains("must not be negative"));
}

#[test]
fn negative_link_number_is_rejected() {
    let assembly = assemble(".link page 0-1\nnop\n");
    assert!(messages(&assembly)[0].contains(".link page number -1 is out of range"));
    assert!(assembly.object.to_o65().linkage_wishes().is_empty());
}

#[test]
fn constant_branch_target_is_rejected() {
    let assembly = assemble("bne 5\n");
    assert!(messages(&assembly)[0].contains("relative target must not be a constant"));
}

#[test]
fn missing_anonymous_label_is_reported() {
    let assembly = assemble("beq +\n");
    assert!(messages(&assembly)[0].contains("no '+' label to branch to"));
}

#[test]
fn object_exports_root_labels() {
    let assembly = assemble_clean("*=$C000\nreset sei\n.data\n*=$0300\ntable .byt 1\n.text\njsr print\n");
    let module = assembly.object.to_o65();
    assert_eq!(module.symbol_address("reset"), Some(0xC000));
    assert_eq!(module.symbol_address("table"), Some(0x300));
    assert_eq!(module.extern_list(), vec!["print".to_string()]);
}

#[test]
fn failed_assembly_renders_diagnostics() {
    let error = assemble("lda (\n").into_result().expect_err("errors");
    let AssembleError::Failed { diagnostics, rendered } = error else {
        panic!("expected failure");
    };
    assert_eq!(diagnostics.len(), 1);
    assert!(rendered.contains("is invalid parameter for 'lda'"));
}

#[test]
fn missing_file_is_an_io_error() {
    let error = assemble_files(
        &[PathBuf::from("/nonexistent/nes65/input.s")],
        &AssembleOptions::default(),
        &crate::preprocess::Passthrough,
    )
    .expect_err("missing file");
    assert!(matches!(error, AssembleError::Io { .. }));
    assert!(error.to_string().contains("cannot read"));
}

struct Prepend(&'static str);

impl Preprocess for Prepend {
    fn preprocess(&self, _name: &str, text: String) -> io::Result<String> {
        Ok(format!("{}{text}", self.0))
    }
}

#[test]
fn files_pass_through_preprocessor() {
    let dir = std::env::temp_dir().join(format!("nes65-driver-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let first = dir.join("first.s");
    let second = dir.join("second.s");
    std::fs::write(&first, "rts\n").expect("write");
    std::fs::write(&second, "- nop\nbne -\n").expect("write");

    let assembly = assemble_files(
        &[first, second],
        &AssembleOptions::default(),
        &Prepend("# 1 \"marker\"\nclc\n"),
    )
    .expect("assemble");
    assert!(!assembly.has_errors());
    assert_eq!(code(&assembly), vec![0x18, 0x60, 0x18, 0xEA, 0xD0, 0xFD]);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unreadable_sources_are_left_out() {
    let dir = std::env::temp_dir().join(format!("nes65-driver-partial-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let present = dir.join("present.s");
    std::fs::write(&present, "rts\n").expect("write");
    let missing = dir.join("missing.s");

    let (source_map, errors) =
        read_sources(&[missing.clone(), present], &crate::preprocess::Passthrough);
    assert_eq!(source_map.ids().count(), 1);
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], AssembleError::Io { path, .. } if *path == missing));

    let assembly = assemble_map(source_map, &AssembleOptions::default());
    assert_eq!(code(&assembly), vec![0x60]);
    let _ = std::fs::remove_dir_all(&dir);
}
