use super::*;
use proptest::prelude::*;

fn label(name: &str) -> Expression {
    Expression::label(name)
}

fn num(value: i64) -> Expression {
    Expression::number(value)
}

#[test]
fn folds_constant_arithmetic() {
    let expr = Expression::binary(
        BinaryOp::Mul,
        Expression::sum(num(2), num(3), false),
        num(4),
    );
    assert_eq!(expr.fold(), num(20));
}

#[test]
fn division_by_zero_stays_unfolded() {
    let expr = Expression::binary(BinaryOp::Div, num(5), num(0)).fold();
    assert!(!expr.is_const());
    assert_eq!(
        expr.evaluate(|_| None).expect_err("must fail"),
        EvalError::DivisionByZero {
            dump: "($5/$0)".to_string()
        }
    );
}

#[test]
fn shifts_saturate_outside_word_range() {
    assert_eq!(BinaryOp::Shl.apply(1, 64), Some(0));
    assert_eq!(BinaryOp::Shl.apply(1, -1), Some(0));
    assert_eq!(BinaryOp::Shr.apply(-8, 100), Some(-1));
    assert_eq!(BinaryOp::Shr.apply(0x1234, 8), Some(0x12));
}

#[test]
fn flattens_nested_sums_and_moves_constant_last() {
    // 3 + (a - (4 - b)) => a + b - 1
    let inner = Expression::sum(num(4), label("b"), true);
    let mid = Expression::sum(label("a"), inner, true);
    let expr = Expression::sum(num(3), mid, false).fold();
    assert_eq!(
        expr,
        Expression::SumGroup(vec![
            (label("a"), false),
            (label("b"), false),
            (num(-1), false),
        ])
    );
    assert_eq!(expr.to_string(), "(+a+b+$-1)");
}

#[test]
fn negated_sum_distributes_over_terms() {
    let expr = Expression::unary(UnaryOp::Negate, Expression::sum(label("a"), num(2), false));
    assert_eq!(
        expr.fold(),
        Expression::SumGroup(vec![(label("a"), true), (num(-2), false)])
    );
}

#[test]
fn single_negative_term_becomes_negation() {
    let expr = Expression::sum(num(0), label("x"), true).fold();
    assert_eq!(expr, Expression::unary(UnaryOp::Negate, label("x")));
    assert_eq!(expr.to_string(), "-x");
}

#[test]
fn double_negation_and_double_complement_cancel() {
    let neg = Expression::unary(UnaryOp::Negate, Expression::unary(UnaryOp::Negate, label("a")));
    assert_eq!(neg.fold(), label("a"));
    let not = Expression::unary(UnaryOp::BitNot, Expression::unary(UnaryOp::BitNot, label("a")));
    assert_eq!(not.fold(), label("a"));
}

#[test]
fn substitute_label_refolds() {
    let expr = Expression::binary(
        BinaryOp::Shr,
        Expression::sum(label("base"), num(0x10), false),
        num(8),
    )
    .fold();
    assert_eq!(expr.clone().substitute_label("other", 1), expr);
    assert_eq!(expr.substitute_label("base", 0x1230), num(0x12));
}

#[test]
fn used_labels_are_sorted_and_unique() {
    let expr = Expression::binary(
        BinaryOp::And,
        Expression::sum(label("zeta"), label("alpha"), false),
        label("zeta"),
    );
    let labels: Vec<_> = expr.used_labels().into_iter().collect();
    assert_eq!(labels, vec!["alpha".to_string(), "zeta".to_string()]);
}

#[test]
fn decomposes_label_plus_constant() {
    assert_eq!(
        label("table").try_decompose_label_plus_constant(),
        Some(("table".to_string(), 0))
    );
    let plus = Expression::sum(label("table"), num(3), false).fold();
    assert_eq!(
        plus.try_decompose_label_plus_constant(),
        Some(("table".to_string(), 3))
    );
    let minus = Expression::sum(label("table"), num(3), true).fold();
    assert_eq!(
        minus.try_decompose_label_plus_constant(),
        Some(("table".to_string(), -3))
    );
}

#[test]
fn rejects_complex_pointer_shapes() {
    let negative = Expression::sum(num(3), label("table"), true).fold();
    assert_eq!(
        negative.pointer_shape().expect_err("negated label"),
        PointerShapeError::FirstNegative
    );
    let two_labels = Expression::sum(label("a"), label("b"), false).fold();
    assert_eq!(
        two_labels.pointer_shape().expect_err("two labels"),
        PointerShapeError::SecondNotConst
    );
    let three = Expression::SumGroup(vec![
        (label("a"), false),
        (label("b"), false),
        (num(1), false),
    ]);
    assert_eq!(
        three.pointer_shape().expect_err("three terms"),
        PointerShapeError::TermCount
    );
    let product = Expression::binary(BinaryOp::Mul, label("a"), num(2)).fold();
    assert_eq!(
        product.pointer_shape().expect_err("product"),
        PointerShapeError::Unsupported
    );
}

#[test]
fn evaluate_reports_undefined_label() {
    let expr = Expression::sum(label("known"), label("missing"), false);
    let err = expr
        .evaluate(|name| (name == "known").then_some(1))
        .expect_err("missing label");
    assert_eq!(
        err,
        EvalError::UndefinedLabel {
            name: "missing".to_string()
        }
    );
}

#[test]
fn displays_numbers_in_hex() {
    assert_eq!(num(0x1F).to_string(), "$1F");
    assert_eq!(num(-0x1F).to_string(), "$-1F");
    assert_eq!(
        Expression::binary(BinaryOp::Shl, label("a"), num(2)).to_string(),
        "(a shl $2)"
    );
}

#[test]
#[should_panic(expected = "const_value on non-const expression")]
fn const_value_panics_on_labels() {
    label("a").const_value();
}

fn arb_expression() -> impl Strategy<Value = Expression> {
    let leaf = prop_oneof![
        (-300i64..300).prop_map(Expression::Number),
        prop_oneof![Just("a"), Just("b"), Just("c")].prop_map(Expression::label),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            (
                prop_oneof![Just(UnaryOp::Negate), Just(UnaryOp::BitNot)],
                inner.clone()
            )
                .prop_map(|(op, operand)| Expression::unary(op, operand)),
            (
                prop_oneof![
                    Just(BinaryOp::Mul),
                    Just(BinaryOp::Div),
                    Just(BinaryOp::Shl),
                    Just(BinaryOp::Shr),
                    Just(BinaryOp::And),
                    Just(BinaryOp::Or),
                    Just(BinaryOp::Xor),
                ],
                inner.clone(),
                inner.clone()
            )
                .prop_map(|(op, lhs, rhs)| Expression::binary(op, lhs, rhs)),
            prop::collection::vec((inner, any::<bool>()), 1..4).prop_map(Expression::SumGroup),
        ]
    })
}

fn is_flat_sum(expr: &Expression) -> bool {
    match expr {
        Expression::Number(_) | Expression::Label(_) => true,
        Expression::Unary { operand, .. } => is_flat_sum(operand),
        Expression::Binary { lhs, rhs, .. } => is_flat_sum(lhs) && is_flat_sum(rhs),
        Expression::SumGroup(terms) => terms.iter().all(|(term, _)| {
            !matches!(
                term,
                Expression::SumGroup(_)
                    | Expression::Unary {
                        op: UnaryOp::Negate,
                        ..
                    }
            ) && is_flat_sum(term)
        }),
    }
}

proptest! {
    #[test]
    fn fold_is_idempotent(expr in arb_expression()) {
        let once = expr.fold();
        prop_assert_eq!(once.clone().fold(), once);
    }

    #[test]
    fn fold_keeps_sums_flat(expr in arb_expression()) {
        let folded = expr.fold();
        prop_assert!(is_flat_sum(&folded));
        if folded.is_const() {
            prop_assert!(matches!(folded, Expression::Number(_)));
        }
    }

    #[test]
    fn fold_preserves_value(expr in arb_expression(), a in -50i64..50, b in -50i64..50, c in -50i64..50) {
        let lookup = |name: &str| match name {
            "a" => Some(a),
            "b" => Some(b),
            _ => Some(c),
        };
        let before = expr.evaluate(lookup).ok();
        let after = expr.fold().evaluate(lookup).ok();
        prop_assert_eq!(before, after);
    }
}
