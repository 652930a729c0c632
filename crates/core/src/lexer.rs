use logos::Logos;

use crate::diag::Diagnostic;
use crate::span::{SourceId, Span};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip(r"[ \t\f\r]+"))]
pub enum TokenKind {
    #[token(".(")]
    ScopeOpen,
    #[token(".)")]
    ScopeClose,

    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("@")]
    At,
    #[token("#")]
    Hash,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("=")]
    Eq,

    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    String(Vec<u8>),

    #[regex(r"\$-?[0-9a-fA-F]+|0[xX][0-9a-fA-F]+|[0-9]+", parse_number)]
    Number(i64),

    #[regex(r"\.?[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Lexes one statement whose first byte sits at `offset` in the source file.
pub fn lex(source_id: SourceId, input: &str, offset: usize) -> Result<Vec<Token>, Vec<Diagnostic>> {
    let mut lexer = TokenKind::lexer(input);
    let mut tokens = Vec::new();
    let mut diagnostics = Vec::new();

    while let Some(next) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(source_id, offset + range.start, offset + range.end);
        match next {
            Ok(kind) => tokens.push(Token { kind, span }),
            Err(_) => {
                let token = format_token_for_message(lexer.slice());
                diagnostics.push(
                    Diagnostic::parse_error(span, format!("unexpected token {token}"))
                        .with_help("remove or fix this token"),
                );
            }
        }
    }

    if diagnostics.is_empty() {
        Ok(tokens)
    } else {
        Err(diagnostics)
    }
}

fn parse_number(lex: &mut logos::Lexer<TokenKind>) -> Option<i64> {
    let slice = lex.slice();
    if let Some(hex) = slice.strip_prefix('$') {
        return match hex.strip_prefix('-') {
            Some(hex) => i64::from_str_radix(hex, 16).ok().map(i64::wrapping_neg),
            None => i64::from_str_radix(hex, 16).ok(),
        };
    }
    if let Some(hex) = slice.strip_prefix("0x").or_else(|| slice.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    slice.parse::<i64>().ok()
}

/// Only `\n` and `\r` are escapes; any other escaped character stands for itself.
fn parse_string(lex: &mut logos::Lexer<TokenKind>) -> Vec<u8> {
    let slice = lex.slice();
    let content = &slice.as_bytes()[1..slice.len() - 1];
    let mut out = Vec::with_capacity(content.len());
    let mut bytes = content.iter();
    while let Some(byte) = bytes.next() {
        if *byte == b'\\' {
            match bytes.next() {
                Some(b'n') => out.push(b'\n'),
                Some(b'r') => out.push(b'\r'),
                Some(other) => out.push(*other),
                None => {}
            }
        } else {
            out.push(*byte);
        }
    }
    out
}

fn format_token_for_message(token: &str) -> String {
    let escaped: String = token.chars().flat_map(char::escape_default).collect();
    format!("'{escaped}'")
}
