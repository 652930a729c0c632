use super::*;
use crate::diag::DiagnosticKind;

#[test]
fn reports_invalid_operand_for_mnemonic() {
    let diagnostic = parse_error("lda (");
    assert_eq!(diagnostic.kind, DiagnosticKind::Parse);
    assert!(diagnostic.message.contains("is invalid parameter for 'lda'"));
}

#[test]
fn rejects_operand_on_implied_instruction() {
    let diagnostic = parse_error("rts 5");
    assert!(diagnostic.message.contains("'5' is invalid parameter for 'rts'"));
}

#[test]
fn star_alone_cannot_be_a_label() {
    let diagnostic = parse_error("* nop");
    assert!(diagnostic.message.contains("cannot define label '*'"));
    assert!(diagnostic.supplements.iter().any(|supplement| matches!(
        supplement,
        crate::diag::Supplemental::Help(help) if help.contains("*=")
    )));
}

#[test]
fn dotted_name_with_operands_is_unknown_directive() {
    let diagnostic = parse_error(".asciiz \"x\"");
    assert!(diagnostic.message.contains("unknown directive '.asciiz'"));
}

#[test]
fn stray_number_is_reported() {
    let diagnostic = parse_error("1234");
    assert!(diagnostic.message.contains("what is '1234'?"));
}

#[test]
fn assignment_needs_a_value() {
    let diagnostic = parse_error("x =");
    assert!(diagnostic.message.contains("expected expression after '='"));

    let diagnostic = parse_error("x = 1 2");
    assert!(diagnostic.message.contains("unexpected '2' after expression"));
}

#[test]
fn hoist_needs_a_name() {
    let diagnostic = parse_error("&& lda");
    assert!(diagnostic.message.contains("expected a label name after '&'"));
}

#[test]
fn lexer_errors_are_forwarded() {
    let diagnostics = parse_raw(raw("lda %1"), &()).expect_err("lex error");
    assert!(diagnostics[0].message.contains("unexpected token"));
}
