mod expr;
mod fold;

use thiserror::Error;

pub use expr::{BinaryOp, Expression, UnaryOp};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("undefined label \"{name}\" in expression")]
    UndefinedLabel { name: String },
    #[error("division by zero in expression '{dump}'")]
    DivisionByZero { dump: String },
    #[error("expression must be const, got '{dump}'")]
    NotConstant { dump: String },
}

/// Reasons why an operand is not a `label` or `label + constant` pointer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PointerShapeError {
    #[error("must have 2 elements")]
    TermCount,
    #[error("2nd elem isn't const")]
    SecondNotConst,
    #[error("1st elem must not be negative")]
    FirstNegative,
    #[error("1st elem must be a label")]
    FirstNotLabel,
    #[error("not a label/const/label+const")]
    Unsupported,
}

#[cfg(test)]
mod tests;
