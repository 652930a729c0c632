use std::fmt;

use nes65_eval::Expression;

use crate::lexer::TokenKind;

/// Three-valued answer of the operand width predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tristate {
    False,
    Maybe,
    True,
}

impl Tristate {
    pub fn and(self, other: Tristate) -> Tristate {
        match (self, other) {
            (Tristate::False, _) | (_, Tristate::False) => Tristate::False,
            (Tristate::Maybe, _) | (_, Tristate::Maybe) => Tristate::Maybe,
            (Tristate::True, Tristate::True) => Tristate::True,
        }
    }

    pub fn is_true(self) -> bool {
        self == Tristate::True
    }

    pub fn is_false(self) -> bool {
        self == Tristate::False
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value { Tristate::True } else { Tristate::False }
    }
}

/// Explicit operand width request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidthPrefix {
    /// `<x`: bits 0-7.
    LowByte,
    /// `>x`: bits 8-15.
    HighByte,
    /// `!x`: 16-bit word.
    AbsWord,
    /// `@x`: 24-bit long.
    Long,
    /// `^x`: bits 16-23.
    SegByte,
    /// Set internally on branch targets.
    Rel8,
}

impl WidthPrefix {
    pub fn from_token(kind: &TokenKind) -> Option<Self> {
        Some(match kind {
            TokenKind::Lt => Self::LowByte,
            TokenKind::Gt => Self::HighByte,
            TokenKind::Bang => Self::AbsWord,
            TokenKind::At => Self::Long,
            TokenKind::Caret => Self::SegByte,
            _ => return None,
        })
    }

    /// Prefix implied by an operand slot of `size` bytes.
    pub fn for_size(size: usize) -> Option<Self> {
        match size {
            1 => Some(Self::LowByte),
            2 => Some(Self::AbsWord),
            3 => Some(Self::Long),
            _ => None,
        }
    }

    /// Number of bytes emitted for an operand with this prefix.
    pub fn width(self) -> usize {
        match self {
            Self::LowByte | Self::HighByte | Self::SegByte | Self::Rel8 => 1,
            Self::AbsWord => 2,
            Self::Long => 3,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::LowByte => "<",
            Self::HighByte => ">",
            Self::AbsWord => "!",
            Self::Long => "@",
            Self::SegByte => "^",
            Self::Rel8 => "rel ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstructionParameter {
    pub prefix: Option<WidthPrefix>,
    pub expr: Expression,
}

impl InstructionParameter {
    pub fn new(prefix: Option<WidthPrefix>, expr: Expression) -> Self {
        Self { prefix, expr }
    }

    /// A literal byte such as an opcode or a string character.
    pub fn byte(value: u8) -> Self {
        Self::new(Some(WidthPrefix::LowByte), Expression::number(i64::from(value)))
    }

    fn fits(&self, accepted: &[WidthPrefix], low: i64, high: i64) -> Tristate {
        match self.prefix {
            Some(prefix) => accepted.contains(&prefix).into(),
            None => match self.expr.constant() {
                Some(value) => (low..high).contains(&value).into(),
                None => Tristate::Maybe,
            },
        }
    }

    pub fn is_byte(&self) -> Tristate {
        self.fits(
            &[WidthPrefix::LowByte, WidthPrefix::HighByte, WidthPrefix::SegByte],
            -0x80,
            0x100,
        )
    }

    pub fn is_word(&self) -> Tristate {
        self.fits(&[WidthPrefix::AbsWord], -0x8000, 0x1_0000)
    }

    pub fn is_long(&self) -> Tristate {
        self.fits(&[WidthPrefix::Long], -0x80_0000, 0x100_0000)
    }
}

impl fmt::Display for InstructionParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = self.prefix {
            f.write_str(prefix.symbol())?;
        }
        write!(f, "{}", self.expr)
    }
}

/// One candidate encoding of a statement: `(byte width, parameter)` pairs in
/// emission order, opcode byte included.
#[derive(Debug, Clone, PartialEq)]
pub struct OpcodeChoice {
    pub params: Vec<(usize, InstructionParameter)>,
    pub is_certain: bool,
}

impl OpcodeChoice {
    pub fn new(params: Vec<(usize, InstructionParameter)>, is_certain: bool) -> Self {
        Self { params, is_certain }
    }

    pub fn total_width(&self) -> usize {
        self.params.iter().map(|(width, _)| width).sum()
    }

    /// Distance from the "every parameter is a word" guess.
    pub fn baseline_deviation(&self) -> usize {
        self.params.iter().map(|(width, _)| width.abs_diff(2)).sum()
    }

    pub fn params_mut(&mut self) -> impl Iterator<Item = &mut InstructionParameter> + '_ {
        self.params.iter_mut().map(|(_, param)| param)
    }
}

impl fmt::Display for OpcodeChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (width, param)) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{param}({width})")?;
        }
        if self.is_certain {
            f.write_str(" (certain)")?;
        }
        Ok(())
    }
}
