use std::collections::BTreeSet;
use std::fmt;

use crate::{EvalError, PointerShapeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Mul,
    Div,
    Shl,
    Shr,
    And,
    Or,
    Xor,
}

impl UnaryOp {
    pub fn apply(self, value: i64) -> i64 {
        match self {
            Self::Negate => value.wrapping_neg(),
            Self::BitNot => !value,
        }
    }
}

impl BinaryOp {
    /// Returns `None` when the operation has no value (division by zero).
    pub fn apply(self, lhs: i64, rhs: i64) -> Option<i64> {
        let value = match self {
            Self::Mul => lhs.wrapping_mul(rhs),
            Self::Div => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_div(rhs)
            }
            Self::Shl => match u32::try_from(rhs) {
                Ok(count) if count < 64 => lhs << count,
                _ => 0,
            },
            Self::Shr => match u32::try_from(rhs) {
                Ok(count) if count < 64 => lhs >> count,
                Ok(_) if lhs < 0 => -1,
                _ => 0,
            },
            Self::And => lhs & rhs,
            Self::Or => lhs | rhs,
            Self::Xor => lhs ^ rhs,
        };
        Some(value)
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Shl => " shl ",
            Self::Shr => " shr ",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        }
    }
}

/// Expression tree used for operands and `label=value` definitions.
///
/// Addition and subtraction are kept as flat sum groups so that a
/// pointer like `table+2` stays recognizable after folding. Each sum term
/// carries a `negative` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Number(i64),
    Label(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    SumGroup(Vec<(Expression, bool)>),
}

impl Expression {
    pub fn number(value: i64) -> Self {
        Self::Number(value)
    }

    pub fn label(name: impl Into<String>) -> Self {
        Self::Label(name.into())
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `lhs + rhs`, or `lhs - rhs` when `subtract` is set.
    pub fn sum(lhs: Expression, rhs: Expression, subtract: bool) -> Self {
        Self::SumGroup(vec![(lhs, false), (rhs, subtract)])
    }

    pub fn is_const(&self) -> bool {
        self.constant().is_some()
    }

    pub fn constant(&self) -> Option<i64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Label(_) => None,
            Self::Unary { op, operand } => operand.constant().map(|value| op.apply(value)),
            Self::Binary { op, lhs, rhs } => op.apply(lhs.constant()?, rhs.constant()?),
            Self::SumGroup(terms) => terms.iter().try_fold(0i64, |acc, (term, negative)| {
                let value = term.constant()?;
                Some(if *negative {
                    acc.wrapping_sub(value)
                } else {
                    acc.wrapping_add(value)
                })
            }),
        }
    }

    /// Value of an expression already known to be constant.
    ///
    /// # Panics
    ///
    /// Panics when the expression still depends on a label. Callers check
    /// [`Expression::is_const`] first.
    pub fn const_value(&self) -> i64 {
        match self.constant() {
            Some(value) => value,
            None => panic!("const_value on non-const expression '{self}'"),
        }
    }

    pub fn used_labels(&self) -> BTreeSet<String> {
        let mut labels = BTreeSet::new();
        self.collect_labels(&mut labels);
        labels
    }

    fn collect_labels(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Number(_) => {}
            Self::Label(name) => {
                out.insert(name.clone());
            }
            Self::Unary { operand, .. } => operand.collect_labels(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_labels(out);
                rhs.collect_labels(out);
            }
            Self::SumGroup(terms) => {
                for (term, _) in terms {
                    term.collect_labels(out);
                }
            }
        }
    }

    pub fn references_label(&self, name: &str) -> bool {
        match self {
            Self::Number(_) => false,
            Self::Label(label) => label == name,
            Self::Unary { operand, .. } => operand.references_label(name),
            Self::Binary { lhs, rhs, .. } => lhs.references_label(name) || rhs.references_label(name),
            Self::SumGroup(terms) => terms.iter().any(|(term, _)| term.references_label(name)),
        }
    }

    /// Replaces every occurrence of `name` with `value` and refolds.
    pub fn substitute_label(mut self, name: &str, value: i64) -> Expression {
        if !self.references_label(name) {
            return self;
        }
        self.visit_labels_mut(&mut |node| {
            if matches!(node, Self::Label(label) if label == name) {
                *node = Self::Number(value);
            }
        });
        self.fold()
    }

    pub fn rename_label(&mut self, from: &str, to: &str) {
        self.visit_labels_mut(&mut |node| {
            if let Self::Label(label) = node
                && label == from
            {
                *label = to.to_string();
            }
        });
    }

    fn visit_labels_mut(&mut self, visit: &mut impl FnMut(&mut Expression)) {
        match self {
            Self::Number(_) => {}
            Self::Label(_) => visit(self),
            Self::Unary { operand, .. } => operand.visit_labels_mut(visit),
            Self::Binary { lhs, rhs, .. } => {
                lhs.visit_labels_mut(visit);
                rhs.visit_labels_mut(visit);
            }
            Self::SumGroup(terms) => {
                for (term, _) in terms {
                    term.visit_labels_mut(visit);
                }
            }
        }
    }

    /// Splits a folded `label`, `label+const` or `label-const` operand.
    pub fn pointer_shape(&self) -> Result<(String, i64), PointerShapeError> {
        match self {
            Self::Label(name) => Ok((name.clone(), 0)),
            Self::SumGroup(terms) => {
                let [(first, first_negative), (second, second_negative)] = terms.as_slice() else {
                    return Err(PointerShapeError::TermCount);
                };
                let Some(offset) = second.constant() else {
                    return Err(PointerShapeError::SecondNotConst);
                };
                if *first_negative {
                    return Err(PointerShapeError::FirstNegative);
                }
                let Self::Label(name) = first else {
                    return Err(PointerShapeError::FirstNotLabel);
                };
                let offset = if *second_negative {
                    offset.wrapping_neg()
                } else {
                    offset
                };
                Ok((name.clone(), offset))
            }
            _ => Err(PointerShapeError::Unsupported),
        }
    }

    pub fn try_decompose_label_plus_constant(&self) -> Option<(String, i64)> {
        self.pointer_shape().ok()
    }

    /// Substitutes every label through `lookup` and requires a const result.
    pub fn evaluate(&self, mut lookup: impl FnMut(&str) -> Option<i64>) -> Result<i64, EvalError> {
        let mut resolved = self.clone();
        for name in self.used_labels() {
            let value = lookup(&name).ok_or_else(|| EvalError::UndefinedLabel { name: name.clone() })?;
            resolved = resolved.substitute_label(&name, value);
        }
        let resolved = resolved.fold();
        match resolved.constant() {
            Some(value) => Ok(value),
            None if resolved.used_labels().is_empty() => Err(EvalError::DivisionByZero {
                dump: self.to_string(),
            }),
            None => Err(EvalError::NotConstant {
                dump: self.to_string(),
            }),
        }
    }
}

impl From<i64> for Expression {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) if *value < 0 => write!(f, "$-{:X}", value.unsigned_abs()),
            Self::Number(value) => write!(f, "${value:X}"),
            Self::Label(name) => f.write_str(name),
            Self::Unary {
                op: UnaryOp::Negate,
                operand,
            } => write!(f, "-{operand}"),
            Self::Unary {
                op: UnaryOp::BitNot,
                operand,
            } => write!(f, "~{operand}"),
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs}{}{rhs})", op.symbol()),
            Self::SumGroup(terms) => {
                f.write_str("(")?;
                for (term, negative) in terms {
                    f.write_str(if *negative { "-" } else { "+" })?;
                    write!(f, "{term}")?;
                }
                f.write_str(")")
            }
        }
    }
}
