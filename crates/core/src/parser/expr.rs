use nes65_eval::{BinaryOp, Expression, UnaryOp};
use nes65_isa6502::is_reserved_word;

use super::cursor::TokenCursor;
use crate::lexer::TokenKind;

// Binding strength; a larger value binds tighter.
const PRIO_ADDSUB: u8 = 1;
const PRIO_SHIFTS: u8 = 2;
const PRIO_DIVMUL: u8 = 3;
const PRIO_BITAND: u8 = 4;
const PRIO_BITOR: u8 = 5;
const PRIO_BITXOR: u8 = 6;
const PRIO_NEGATE: u8 = 7;
const PRIO_BITNOT: u8 = 8;

/// Name of the current-statement address inside expressions.
pub const HERE_LABEL: &str = "*";

#[derive(Debug, Clone, Copy)]
enum Operator {
    Add,
    Sub,
    Binary(BinaryOp),
}

fn binary_operator(kind: &TokenKind) -> Option<(u8, Operator)> {
    Some(match kind {
        TokenKind::Plus => (PRIO_ADDSUB, Operator::Add),
        TokenKind::Minus => (PRIO_ADDSUB, Operator::Sub),
        TokenKind::Star => (PRIO_DIVMUL, Operator::Binary(BinaryOp::Mul)),
        TokenKind::Slash => (PRIO_DIVMUL, Operator::Binary(BinaryOp::Div)),
        TokenKind::Shl => (PRIO_SHIFTS, Operator::Binary(BinaryOp::Shl)),
        TokenKind::Shr => (PRIO_SHIFTS, Operator::Binary(BinaryOp::Shr)),
        TokenKind::Amp => (PRIO_BITAND, Operator::Binary(BinaryOp::And)),
        TokenKind::Pipe => (PRIO_BITOR, Operator::Binary(BinaryOp::Or)),
        TokenKind::Caret => (PRIO_BITXOR, Operator::Binary(BinaryOp::Xor)),
        _ => return None,
    })
}

/// Anonymous branch label reference: a run of `+` or `-`.
pub fn branch_reference(sign: char, run: usize) -> String {
    std::iter::repeat_n(sign, run).collect()
}

/// Parses one expression. On failure the cursor position is unspecified;
/// callers restore their own checkpoint.
pub fn parse_expression(cursor: &mut TokenCursor<'_>) -> Option<Expression> {
    parse_with_priority(cursor, 0, false)
}

fn parse_with_priority(
    cursor: &mut TokenCursor<'_>,
    priority: u8,
    negated: bool,
) -> Option<Expression> {
    let mut left = parse_operand(cursor, negated)?;

    while let Some((op_priority, op)) = cursor.peek_kind().and_then(binary_operator) {
        if priority >= op_priority {
            break;
        }
        let checkpoint = cursor.checkpoint();
        cursor.bump();
        let Some(right) = parse_with_priority(cursor, op_priority, false) else {
            cursor.restore(checkpoint);
            break;
        };
        left = match op {
            Operator::Add => Expression::sum(left, right, false),
            Operator::Sub => Expression::sum(left, right, true),
            Operator::Binary(op) => Expression::binary(op, left, right),
        };
    }
    Some(left)
}

/// `negated` is set right after a unary minus, where a `-` run may not be
/// read as a backward branch label: `--` then means the label, not a double
/// negation of nothing.
fn parse_operand(cursor: &mut TokenCursor<'_>, negated: bool) -> Option<Expression> {
    match cursor.peek_kind()? {
        TokenKind::Number(value) => {
            let value = *value;
            cursor.bump();
            Some(Expression::number(value))
        }
        TokenKind::Ident(name) => {
            if is_reserved_word(name) {
                return None;
            }
            let name = name.clone();
            cursor.bump();
            Some(Expression::label(name))
        }
        TokenKind::Star => {
            cursor.bump();
            Some(Expression::label(HERE_LABEL))
        }
        TokenKind::Plus => {
            let run = cursor.adjacent_run(&TokenKind::Plus);
            cursor.skip(run);
            Some(Expression::label(branch_reference('+', run)))
        }
        TokenKind::Minus => {
            let run = cursor.adjacent_run(&TokenKind::Minus);
            let checkpoint = cursor.checkpoint();
            cursor.bump();
            if !cursor.at(&TokenKind::Plus)
                && let Some(operand) = parse_with_priority(cursor, PRIO_NEGATE, true)
            {
                return Some(Expression::unary(UnaryOp::Negate, operand));
            }
            cursor.restore(checkpoint);
            if negated {
                return None;
            }
            cursor.skip(run);
            Some(Expression::label(branch_reference('-', run)))
        }
        TokenKind::Tilde => {
            cursor.bump();
            let operand = parse_with_priority(cursor, PRIO_BITNOT, false)?;
            Some(Expression::unary(UnaryOp::BitNot, operand))
        }
        TokenKind::LParen => {
            cursor.bump();
            let inner = parse_with_priority(cursor, 0, false)?;
            cursor.eat(&TokenKind::RParen).then_some(inner)
        }
        _ => None,
    }
}

/// True for `+`, `++`, `-`, ... placeholders produced by the parser.
pub fn is_branch_reference(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(sign @ ('+' | '-')) => chars.all(|ch| ch == sign),
        _ => false,
    }
}
