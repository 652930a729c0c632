use crate::expr::{Expression, UnaryOp};

impl Expression {
    /// Constant-folds the tree.
    ///
    /// After folding every constant subtree is a single `Number` and every
    /// sum group is flat: no term is a sum group or a negation, and the
    /// accumulated constant (if nonzero) is the last term.
    pub fn fold(self) -> Expression {
        let folded = match self {
            Self::Number(_) | Self::Label(_) => return self,
            Self::Unary { op, operand } => fold_unary(op, operand.fold()),
            Self::Binary { op, lhs, rhs } => Self::binary(op, lhs.fold(), rhs.fold()),
            Self::SumGroup(terms) => fold_sum(terms),
        };
        match folded {
            Self::Number(_) => folded,
            _ => match folded.constant() {
                Some(value) => Self::Number(value),
                None => folded,
            },
        }
    }
}

fn fold_unary(op: UnaryOp, operand: Expression) -> Expression {
    match (op, operand) {
        (UnaryOp::Negate, Expression::SumGroup(terms)) => fold_sum(
            terms
                .into_iter()
                .map(|(term, negative)| (term, !negative))
                .collect(),
        ),
        (
            UnaryOp::Negate,
            Expression::Unary {
                op: UnaryOp::Negate,
                operand,
            },
        ) => *operand,
        (
            UnaryOp::BitNot,
            Expression::Unary {
                op: UnaryOp::BitNot,
                operand,
            },
        ) => *operand,
        (op, operand) => Expression::unary(op, operand),
    }
}

#[derive(Default)]
struct SumBuilder {
    terms: Vec<(Expression, bool)>,
    constant: i64,
}

impl SumBuilder {
    fn absorb(&mut self, term: Expression, negative: bool) {
        if let Some(value) = term.constant() {
            self.constant = if negative {
                self.constant.wrapping_sub(value)
            } else {
                self.constant.wrapping_add(value)
            };
            return;
        }
        match term {
            Expression::Unary {
                op: UnaryOp::Negate,
                operand,
            } => self.absorb(*operand, !negative),
            Expression::SumGroup(nested) => {
                for (inner, inner_negative) in nested {
                    self.absorb(inner, inner_negative != negative);
                }
            }
            other => self.terms.push((other, negative)),
        }
    }

    fn finish(mut self) -> Expression {
        if self.terms.is_empty() {
            return Expression::Number(self.constant);
        }
        if self.constant != 0 {
            self.terms.push((Expression::Number(self.constant), false));
        }
        if self.terms.len() == 1 {
            let Some((term, negative)) = self.terms.pop() else {
                return Expression::Number(0);
            };
            return if negative {
                fold_unary(UnaryOp::Negate, term)
            } else {
                term
            };
        }
        Expression::SumGroup(self.terms)
    }
}

fn fold_sum(terms: Vec<(Expression, bool)>) -> Expression {
    let mut builder = SumBuilder::default();
    for (term, negative) in terms {
        builder.absorb(term.fold(), negative);
    }
    builder.finish()
}
