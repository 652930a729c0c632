mod cursor;
mod expr;
mod stmt;

pub use cursor::{Checkpoint, TokenCursor};
pub use expr::{HERE_LABEL, branch_reference, is_branch_reference, parse_expression};
pub use stmt::{
    Body, DataWidth, LabelItem, LabelName, LinkKind, Statement, SymbolView, parse_parameter,
    parse_statement,
};

use crate::diag::Diagnostic;
use crate::lexer::lex;
use crate::span::{SourceFile, SourceId, Span};

/// One delimited statement, not yet lexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStatement<'a> {
    pub text: &'a str,
    pub span: Span,
}

/// Splits a file into statements.
///
/// `:`, CR and LF end a statement unless they sit inside a string literal.
/// `;` starts a comment running to the end of the line. Lines starting with
/// `#` are preprocessor line markers and are skipped whole.
pub fn split_statements(source_id: SourceId, file: &SourceFile) -> Vec<RawStatement<'_>> {
    let mut statements = Vec::new();
    for (line_start, line) in file.lines() {
        if line.starts_with('#') {
            continue;
        }

        let bytes = line.as_bytes();
        let mut push = |start: usize, end: usize| {
            let text = &line[start..end];
            if !text.trim().is_empty() {
                statements.push(RawStatement {
                    text,
                    span: Span::new(source_id, line_start + start, line_start + end),
                });
            }
        };

        let mut start = 0;
        let mut quoted = false;
        let mut index = 0;
        while index < bytes.len() {
            match bytes[index] {
                b'\\' if quoted => index += 1,
                b'"' => quoted = !quoted,
                b':' | b'\r' | b'\n' if !quoted => {
                    push(start, index);
                    start = index + 1;
                }
                b';' if !quoted => {
                    push(start, index);
                    start = bytes.len();
                    break;
                }
                _ => {}
            }
            index += 1;
        }
        if start < bytes.len() {
            push(start, bytes.len());
        }
    }
    statements
}

/// Lexes and parses one raw statement.
pub fn parse_raw(raw: RawStatement<'_>, symbols: &dyn SymbolView) -> Result<Statement, Vec<Diagnostic>> {
    let tokens = lex(raw.span.source_id, raw.text, raw.span.start)?;
    let mut cursor = TokenCursor::new(&tokens, raw.text, raw.span);
    parse_statement(&mut cursor, symbols).map_err(|diagnostic| vec![diagnostic])
}
