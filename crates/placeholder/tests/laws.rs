//! Algebraic laws of placeholder expressions, checked with proptest.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use placeholder::prelude::*;
use placeholder::{ErrorKind, ops};
use proptest::prelude::*;

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        (-1_000_i64..1_000).prop_map(Value::Int),
        (-1.0e6_f64..1.0e6).prop_map(Value::Float),
        "[a-z]{0,6}".prop_map(Value::from),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => scalar(),
        1 => prop::collection::vec(scalar(), 0..4).prop_map(Value::List),
        1 => Just(Value::None),
    ]
}

fn binary_op() -> impl Strategy<Value = BinaryOp> {
    prop::sample::select(vec![
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Pow,
        BinaryOp::Mod,
        BinaryOp::Gt,
        BinaryOp::Lt,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Ge,
        BinaryOp::Le,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Xor,
        BinaryOp::LShift,
    ])
}

fn small_int() -> impl Strategy<Value = Value> {
    (-40_i64..40).prop_map(Value::Int)
}

fn same_outcome(tree: Result<Value, EvalError>, native: Result<Value, placeholder::OpError>) {
    match (tree, native) {
        (Ok(actual), Ok(expected)) => assert!(
            expected.identical(&actual),
            "expected {expected}, got {actual}"
        ),
        (Err(_), Err(_)) => {}
        (tree, native) => panic!("tree returned {tree:?}, native returned {native:?}"),
    }
}

fn affine(scale: i64, offset: i64) -> Expr {
    let scaled = Expr::binary(BinaryOp::Mul, Expr::identity(), scale).expect("scale");
    Expr::binary(BinaryOp::Add, scaled, offset).expect("offset")
}

proptest! {
    #[test]
    fn identity_returns_its_input(input in value()) {
        let out = Expr::identity().eval(std::slice::from_ref(&input)).expect("identity");
        prop_assert!(out.identical(&input));
    }

    #[test]
    fn binary_with_literal_right_matches_native(op in binary_op(), a in small_int(), b in small_int()) {
        let expr = Expr::binary(op, Expr::identity(), Operand::Literal(b.clone())).expect("binary");
        same_outcome(
            expr.eval(std::slice::from_ref(&a)),
            ops::binary(op, &a, &b, &EvalPolicy::strict()),
        );
    }

    #[test]
    fn binary_with_literal_left_matches_native(op in binary_op(), a in scalar(), b in scalar()) {
        let expr = Expr::binary(op, Operand::Literal(b.clone()), Expr::identity()).expect("binary");
        same_outcome(
            expr.eval(std::slice::from_ref(&a)),
            ops::binary(op, &b, &a, &EvalPolicy::strict()),
        );
    }

    #[test]
    fn two_input_expressions_need_both_inputs(a in -1_000_i64..1_000, b in -1_000_i64..1_000) {
        let sum = Expr::binary(BinaryOp::Add, Expr::identity(), Expr::slot(Slot::SECOND))
            .expect("binary");
        let err = sum.eval(&[Value::Int(a)]).expect_err("one input");
        prop_assert_eq!(err.kind(), ErrorKind::ArityMismatch);
        prop_assert_eq!(sum.eval(&[Value::Int(a), Value::Int(b)]).expect("eval"), Value::Int(a + b));
    }

    #[test]
    fn pipe_composes(
        input in -1_000_i64..1_000,
        f in (-20_i64..20, -50_i64..50),
        g in (-20_i64..20, -50_i64..50),
    ) {
        let first = affine(f.0, f.1);
        let second = affine(g.0, g.1);
        let piped = Expr::pipe(first.clone(), second.clone()).expect("pipe");

        let inner = first.eval(&[Value::Int(input)]).expect("first");
        let nested = second.eval(&[inner]).expect("second");
        prop_assert_eq!(piped.eval(&[Value::Int(input)]).expect("piped"), nested);
    }

    #[test]
    fn evaluation_does_not_leak_between_calls(a in value(), b in value()) {
        let expr = Expr::binary(BinaryOp::Eq, Expr::identity(), Expr::identity()).expect("binary");
        let first = expr.eval(std::slice::from_ref(&a));
        let _ = expr.eval(std::slice::from_ref(&b));
        let again = expr.eval(std::slice::from_ref(&a));
        prop_assert_eq!(first.ok(), again.ok());
    }
}

#[test]
fn three_distinct_slots_are_rejected() {
    let pair = Expr::binary(BinaryOp::Add, Expr::identity(), Expr::slot(Slot::SECOND))
        .expect("pair");
    let err = Expr::binary(BinaryOp::Mul, pair, Expr::slot(Slot::new(2))).expect_err("third slot");
    assert_eq!(err, ConstructionError::TooManyReferences { count: 3 });
}

#[test]
fn missing_method_is_reported_before_arguments_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let argument = Expr::apply("count", move |value| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    });
    let expr = Expr::identity()
        .method("nope", [Operand::from(argument)])
        .expect("method");

    let err = expr.eval(&[Value::Int(1)]).expect_err("missing method");
    assert_eq!(err.kind(), ErrorKind::AttributeNotFound);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_attribute_and_key_report_their_kind() {
    let attr = Expr::identity().attr("missing");
    assert_eq!(
        attr.eval(&[Value::Int(1)]).expect_err("attr").kind(),
        ErrorKind::AttributeNotFound
    );

    let item = Expr::identity().item("missing").expect("item");
    let map = Value::Map([("present".to_owned(), Value::Int(1))].into_iter().collect());
    assert_eq!(
        item.eval(&[map]).expect_err("key").kind(),
        ErrorKind::KeyLookupError
    );
}

#[test]
fn one_expression_is_shared_across_threads() {
    let expr = Expr::binary(BinaryOp::Pow, Expr::identity(), 2)
        .expect("binary")
        .map("str", |value| Ok(Value::Str(value.to_string())));

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0_i64..8)
            .map(|n| {
                let expr = &expr;
                scope.spawn(move || expr.eval(&[Value::Int(n)]).expect("eval"))
            })
            .collect();
        for (n, handle) in (0_i64..8).zip(handles) {
            assert_eq!(handle.join().expect("join"), Value::Str((n * n).to_string()));
        }
    });
}
