use nes65_eval::Expression;
use nes65_isa6502::{
    AddressingMode, EntryKind, InstructionEntry, ModeSyntax, ParamKind, SyntaxToken, lookup,
    operand_size,
};
use nes65_o65::SegmentId;

use super::cursor::TokenCursor;
use super::expr::parse_expression;
use crate::diag::Diagnostic;
use crate::insn::{InstructionParameter, OpcodeChoice, Tristate, WidthPrefix};
use crate::lexer::TokenKind;
use crate::span::Span;

/// Read-only view of the labels known while a statement is parsed.
pub trait SymbolView {
    /// Value of `name` if it is visible and names an absolute constant.
    fn constant(&self, name: &str) -> Option<i64>;
}

impl SymbolView for () {
    fn constant(&self, _name: &str) -> Option<i64> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelName {
    pub name: String,
    /// Number of leading `&`: how many scopes outward the label goes.
    pub hoist: usize,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LabelItem {
    Named(LabelName),
    /// A run of `+`.
    Forward { run: usize, span: Span },
    /// A run of `-`.
    Backward { run: usize, span: Span },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    Byte,
    Word,
    Long,
}

impl DataWidth {
    pub fn size(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long => 3,
        }
    }

    pub fn directive(self) -> &'static str {
        match self {
            Self::Byte => ".byt",
            Self::Word => ".word",
            Self::Long => ".long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Group,
    Page,
}

impl LinkKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Page => "page",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// `name = value`
    Assign { name: LabelName, value: Expression },
    /// `*= value`
    SetPosition(Expression),
    Instruction {
        mnemonic: &'static str,
        choices: Vec<OpcodeChoice>,
    },
    Data { width: DataWidth, choice: OpcodeChoice },
    /// `.nop [count]`
    Nop(Option<Expression>),
    ScopeOpen,
    ScopeClose,
    Segment(SegmentId),
    Link { kind: LinkKind, value: Expression },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub span: Span,
    pub labels: Vec<LabelItem>,
    pub body: Option<Body>,
}

impl Statement {
    /// Every candidate encoding carried by the body.
    pub fn choices_mut(&mut self) -> impl Iterator<Item = &mut OpcodeChoice> + '_ {
        let choices: &mut [OpcodeChoice] = match &mut self.body {
            Some(Body::Instruction { choices, .. }) => choices,
            Some(Body::Data { choice, .. }) => std::slice::from_mut(choice),
            _ => &mut [],
        };
        choices.iter_mut()
    }

    /// Expressions of the body that are evaluated rather than emitted.
    pub fn value_mut(&mut self) -> Option<&mut Expression> {
        match &mut self.body {
            Some(Body::Assign { value, .. })
            | Some(Body::SetPosition(value))
            | Some(Body::Link { value, .. })
            | Some(Body::Nop(Some(value))) => Some(value),
            _ => None,
        }
    }
}

enum LabelOrBody {
    Label(LabelName),
    Body(Body),
}

pub fn parse_statement(
    cursor: &mut TokenCursor<'_>,
    symbols: &dyn SymbolView,
) -> Result<Statement, Diagnostic> {
    let mut labels = Vec::new();

    let body = loop {
        let Some(token) = cursor.peek() else {
            break None;
        };

        let parsed = match &token.kind {
            TokenKind::Plus | TokenKind::Minus => {
                let run = cursor.adjacent_run(&token.kind);
                let span = Span::new(
                    token.span.source_id,
                    token.span.start,
                    token.span.start + run,
                );
                cursor.skip(run);
                labels.push(if token.kind == TokenKind::Plus {
                    LabelItem::Forward { run, span }
                } else {
                    LabelItem::Backward { run, span }
                });
                continue;
            }
            TokenKind::Amp => {
                let mut hoist = 0;
                while cursor.eat(&TokenKind::Amp) {
                    hoist += 1;
                }
                match cursor.peek_kind() {
                    Some(TokenKind::Ident(name)) if lookup(name).is_none() => {
                        parse_label(cursor, hoist)?
                    }
                    _ => {
                        return Err(Diagnostic::parse_error(
                            cursor.current_span(),
                            format!("expected a label name after '&', found '{}'", cursor.rest()),
                        ));
                    }
                }
            }
            TokenKind::Star => {
                cursor.bump();
                if !cursor.eat(&TokenKind::Eq) {
                    return Err(Diagnostic::parse_error(token.span, "cannot define label '*'")
                        .with_help("perhaps you meant '*= <value>'?"));
                }
                LabelOrBody::Body(Body::SetPosition(parse_value(cursor, "*=")?))
            }
            TokenKind::ScopeOpen => LabelOrBody::Body(parse_keyword(cursor, ".(", symbols)?),
            TokenKind::ScopeClose => LabelOrBody::Body(parse_keyword(cursor, ".)", symbols)?),
            TokenKind::Ident(name) => {
                let lower = name.to_ascii_lowercase();
                match lower.as_str() {
                    ".byt" => LabelOrBody::Body(parse_data(cursor, DataWidth::Byte, symbols)?),
                    ".word" => LabelOrBody::Body(parse_data(cursor, DataWidth::Word, symbols)?),
                    ".long" => LabelOrBody::Body(parse_data(cursor, DataWidth::Long, symbols)?),
                    ".nop" => LabelOrBody::Body(parse_nop(cursor)?),
                    _ if lookup(&lower).is_some() => {
                        LabelOrBody::Body(parse_keyword(cursor, &lower, symbols)?)
                    }
                    _ => parse_label(cursor, 0)?,
                }
            }
            _ => {
                return Err(Diagnostic::parse_error(
                    cursor.rest_span(),
                    format!("what is '{}'?", cursor.rest()),
                ));
            }
        };

        match parsed {
            LabelOrBody::Label(label) => labels.push(LabelItem::Named(label)),
            LabelOrBody::Body(body) => break Some(body),
        }
    };

    Ok(Statement {
        span: cursor.statement_span(),
        labels,
        body,
    })
}

/// A label definition, or `name = value` when an `=` follows.
fn parse_label(cursor: &mut TokenCursor<'_>, hoist: usize) -> Result<LabelOrBody, Diagnostic> {
    let token = cursor.bump().ok_or_else(|| {
        Diagnostic::parse_error(cursor.current_span(), "expected a label name")
    })?;
    let TokenKind::Ident(name) = &token.kind else {
        return Err(Diagnostic::parse_error(token.span, "expected a label name"));
    };
    let label = LabelName {
        name: name.clone(),
        hoist,
        span: token.span,
    };

    if cursor.eat(&TokenKind::Eq) {
        let value = parse_value(cursor, "=")?;
        return Ok(LabelOrBody::Body(Body::Assign { name: label, value }));
    }
    if name.starts_with('.') && !cursor.is_eof() {
        return Err(
            Diagnostic::parse_error(token.span, format!("unknown directive '{name}'"))
                .with_help("a '.' label must be the last thing in its statement"),
        );
    }
    Ok(LabelOrBody::Label(label))
}

/// An expression that must make up the rest of the statement.
fn parse_value(cursor: &mut TokenCursor<'_>, after: &str) -> Result<Expression, Diagnostic> {
    let start = cursor.current_span();
    let Some(value) = parse_expression(cursor) else {
        return Err(Diagnostic::parse_error(
            start,
            format!("expected expression after '{after}'"),
        ));
    };
    if !cursor.is_eof() {
        return Err(Diagnostic::parse_error(
            cursor.rest_span(),
            format!("unexpected '{}' after expression", cursor.rest()),
        ));
    }
    Ok(value.fold())
}

/// Operand with optional width prefix. Known absolute constants are
/// substituted so that width tests see their values.
pub fn parse_parameter(
    cursor: &mut TokenCursor<'_>,
    symbols: &dyn SymbolView,
) -> Option<InstructionParameter> {
    let prefix = cursor.peek_kind().and_then(WidthPrefix::from_token);
    if prefix.is_some() {
        cursor.bump();
    }
    let mut expr = parse_expression(cursor)?.fold();
    for name in expr.used_labels() {
        if let Some(value) = symbols.constant(&name) {
            expr = expr.substitute_label(&name, value);
        }
    }
    Some(InstructionParameter::new(prefix, expr))
}

fn parse_data(
    cursor: &mut TokenCursor<'_>,
    width: DataWidth,
    symbols: &dyn SymbolView,
) -> Result<Body, Diagnostic> {
    cursor.bump();
    let mut params = Vec::new();
    let mut first = true;
    while !cursor.is_eof() {
        if !first {
            cursor.eat(&TokenKind::Comma);
        }
        first = false;

        if let Some(TokenKind::String(bytes)) = cursor.peek_kind() {
            if width != DataWidth::Byte {
                return Err(Diagnostic::parse_error(
                    cursor.current_span(),
                    format!("string literals are only allowed in .byt, not {}", width.directive()),
                ));
            }
            params.extend(bytes.iter().map(|byte| (1, InstructionParameter::byte(*byte))));
            cursor.bump();
            continue;
        }

        let start = cursor.current_span();
        let Some(param) = parse_parameter(cursor, symbols) else {
            return Err(Diagnostic::parse_error(
                cursor.rest_span(),
                format!("syntax error in {} at '{}'", width.directive(), cursor.rest()),
            ));
        };
        let fits = match width {
            DataWidth::Byte => param.is_byte(),
            DataWidth::Word => param.is_word(),
            DataWidth::Long => param.is_long(),
        };
        if fits.is_false() {
            return Err(Diagnostic::parse_error(
                start,
                format!("'{param}' does not fit in {}", width.directive()),
            ));
        }
        params.push((width.size(), param));
    }
    Ok(Body::Data {
        width,
        choice: OpcodeChoice::new(params, true),
    })
}

fn parse_nop(cursor: &mut TokenCursor<'_>) -> Result<Body, Diagnostic> {
    cursor.bump();
    if cursor.is_eof() {
        return Ok(Body::Nop(None));
    }
    Ok(Body::Nop(Some(parse_value(cursor, ".nop")?)))
}

fn token_matches(kind: &TokenKind, expected: SyntaxToken) -> bool {
    match (expected, kind) {
        (SyntaxToken::Hash, TokenKind::Hash)
        | (SyntaxToken::Open, TokenKind::LParen)
        | (SyntaxToken::Close, TokenKind::RParen)
        | (SyntaxToken::Comma, TokenKind::Comma) => true,
        (SyntaxToken::RegX | SyntaxToken::RegY | SyntaxToken::Group | SyntaxToken::Page, TokenKind::Ident(word)) => {
            word.eq_ignore_ascii_case(expected.text())
        }
        _ => false,
    }
}

fn eat_syntax(cursor: &mut TokenCursor<'_>, expected: SyntaxToken) -> bool {
    if cursor.peek_kind().is_some_and(|kind| token_matches(kind, expected)) {
        cursor.bump();
        true
    } else {
        false
    }
}

/// Tries one addressing-mode syntax against the rest of the statement.
fn match_mode(
    cursor: &mut TokenCursor<'_>,
    syntax: ModeSyntax,
    symbols: &dyn SymbolView,
) -> Option<(Option<InstructionParameter>, Tristate)> {
    if let Some(forbid) = syntax.forbid
        && cursor.peek_kind().is_some_and(|kind| token_matches(kind, forbid))
    {
        return None;
    }
    for token in syntax.prefix {
        if !eat_syntax(cursor, *token) {
            return None;
        }
    }
    let param = match syntax.param {
        ParamKind::None => None,
        _ => Some(parse_parameter(cursor, symbols)?),
    };
    for token in syntax.suffix {
        if !eat_syntax(cursor, *token) {
            return None;
        }
    }

    let mut valid = Tristate::from(cursor.is_eof());
    if let Some(param) = &param {
        valid = match syntax.param {
            ParamKind::Byte => valid.and(param.is_byte()),
            ParamKind::Word => valid.and(param.is_word()),
            ParamKind::None | ParamKind::Rel8 => valid,
        };
    }
    Some((param, valid))
}

/// Mnemonic or table directive: every mode whose syntax fits becomes a candidate.
fn parse_keyword(
    cursor: &mut TokenCursor<'_>,
    keyword: &str,
    symbols: &dyn SymbolView,
) -> Result<Body, Diagnostic> {
    let Some(entry) = lookup(keyword) else {
        return Err(Diagnostic::internal(
            cursor.current_span(),
            format!("'{keyword}' is missing from the instruction table"),
        ));
    };
    let keyword_span = cursor.current_span();
    cursor.bump();

    let mut matches = Vec::new();
    for mode in entry.modes() {
        let checkpoint = cursor.checkpoint();
        if let Some((param, valid)) = match_mode(cursor, mode.syntax(), symbols)
            && !valid.is_false()
        {
            matches.push((mode, param, valid));
        }
        cursor.restore(checkpoint);
    }

    if matches.is_empty() {
        return Err(Diagnostic::parse_error(
            cursor.rest_span().to(keyword_span),
            format!(
                "'{}' is invalid parameter for '{}'",
                cursor.rest(),
                entry.mnemonic
            ),
        ));
    }

    match entry.kind {
        EntryKind::Opcode => Ok(Body::Instruction {
            mnemonic: entry.mnemonic,
            choices: opcode_choices(entry, matches),
        }),
        EntryKind::Directive => directive_body(entry, matches, keyword_span),
    }
}

fn opcode_choices(
    entry: &InstructionEntry,
    matches: Vec<(AddressingMode, Option<InstructionParameter>, Tristate)>,
) -> Vec<OpcodeChoice> {
    matches
        .into_iter()
        .filter_map(|(mode, param, valid)| {
            let opcode = entry.opcode(mode)?;
            let mut params = vec![(1, InstructionParameter::byte(opcode))];
            if let Some(mut param) = param {
                if mode.syntax().param == ParamKind::Rel8 {
                    param.prefix = Some(WidthPrefix::Rel8);
                }
                params.push((operand_size(mode), param));
            }
            Some(OpcodeChoice::new(params, valid.is_true()))
        })
        .collect()
}

fn directive_body(
    entry: &InstructionEntry,
    matches: Vec<(AddressingMode, Option<InstructionParameter>, Tristate)>,
    span: Span,
) -> Result<Body, Diagnostic> {
    let Some((mode, param, _)) = matches.into_iter().next() else {
        return Err(Diagnostic::internal(span, "directive matched no mode"));
    };
    let body = match (entry.mnemonic, mode, param) {
        (".(", _, _) => Body::ScopeOpen,
        (".)", _, _) => Body::ScopeClose,
        (".text", _, _) => Body::Segment(SegmentId::Code),
        (".data", _, _) => Body::Segment(SegmentId::Data),
        (".zero", _, _) => Body::Segment(SegmentId::Zero),
        (".bss", _, _) => Body::Segment(SegmentId::Bss),
        (".link", AddressingMode::LinkGroup, Some(param)) => Body::Link {
            kind: LinkKind::Group,
            value: param.expr,
        },
        (".link", AddressingMode::LinkPage, Some(param)) => Body::Link {
            kind: LinkKind::Page,
            value: param.expr,
        },
        (mnemonic, mode, _) => {
            return Err(Diagnostic::internal(
                span,
                format!("no handler for directive '{mnemonic}' in mode {mode:?}"),
            ));
        }
    };
    Ok(body)
}
