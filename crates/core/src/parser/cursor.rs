use crate::lexer::{Token, TokenKind};
use crate::span::Span;

/// Saved cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Backtracking reader over the tokens of one statement.
#[derive(Debug, Clone)]
pub struct TokenCursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    text: &'a str,
    span: Span,
}

impl<'a> TokenCursor<'a> {
    /// `text` is the raw statement and `span` its location in the source.
    pub fn new(tokens: &'a [Token], text: &'a str, span: Span) -> Self {
        Self {
            tokens,
            pos: 0,
            text,
            span,
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.pos)
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.0;
    }

    pub fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek_kind(&self) -> Option<&'a TokenKind> {
        self.peek().map(|token| &token.kind)
    }

    pub fn peek_nth_kind(&self, n: usize) -> Option<&'a TokenKind> {
        self.tokens.get(self.pos + n).map(|token| &token.kind)
    }

    pub fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    pub fn bump(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    pub fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Length of the run of `kind` tokens starting here with no whitespace
    /// between them.
    pub fn adjacent_run(&self, kind: &TokenKind) -> usize {
        let mut run = 0;
        while let Some(token) = self.tokens.get(self.pos + run) {
            if token.kind != *kind {
                break;
            }
            if run > 0 && !self.tokens[self.pos + run - 1].span.is_adjacent_to(&token.span) {
                break;
            }
            run += 1;
        }
        run
    }

    pub fn skip(&mut self, count: usize) {
        self.pos = (self.pos + count).min(self.tokens.len());
    }

    /// Span of the next token, or an empty span at the end of the statement.
    pub fn current_span(&self) -> Span {
        match self.peek() {
            Some(token) => token.span,
            None => Span::new(self.span.source_id, self.span.end, self.span.end),
        }
    }

    /// Span from the next token to the end of the statement.
    pub fn rest_span(&self) -> Span {
        let start = self.current_span().start;
        Span::new(self.span.source_id, start, self.span.end.max(start))
    }

    /// Unparsed source text, for messages.
    pub fn rest(&self) -> &'a str {
        let start = self.current_span().start.saturating_sub(self.span.start);
        self.text.get(start..).unwrap_or_default().trim()
    }

    pub fn statement_span(&self) -> Span {
        self.span
    }
}
