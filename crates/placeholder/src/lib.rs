#![forbid(unsafe_code)]

//! Placeholder expressions.
//!
//! An [`Expr`] is a deferred computation over one or two anonymous inputs.
//! It is assembled from base placeholders with operators, attribute and
//! item access, method calls and pipelines, and only runs when evaluated:
//!
//! ```
//! use placeholder::prelude::*;
//!
//! let plus_one = Expr::binary(BinaryOp::Add, Expr::identity(), 1)?;
//! assert_eq!(plus_one.to_string(), "_0 + 1");
//! assert_eq!(plus_one.eval(&[Value::Int(41)])?, Value::Int(42));
//!
//! let shout = Expr::identity().method("upper", [])?.map("len", |value| match value {
//!     Value::Str(text) => Ok(Value::Int(text.len() as i64)),
//!     other => Ok(other),
//! });
//! assert_eq!(shout.to_string(), "_0.upper() >> len(_0)");
//! assert_eq!(shout.eval(&[Value::from("abc")])?, Value::Int(3));
//!
//! let diff = Expr::binary(BinaryOp::Sub, Expr::slot(Slot::SECOND), Expr::identity())?;
//! assert_eq!(diff.arity(), 2);
//! assert_eq!(diff.eval(&[Value::Int(3), Value::Int(10)])?, Value::Int(7));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Evaluation follows Python-like value semantics: `/` always yields a float,
//! `%` takes the sign of the divisor, strings and lists concatenate and
//! repeat, and integer overflow is an error unless the [`EvalPolicy`] asks
//! for promotion to float.

pub use ph_expr::{
    ConstructionError, ErrorKind, EvalError, Expr, HostFn, Node, Operand, Operation, Slot,
    SlotSet, evaluate, evaluate_with_policy,
};
pub use ph_ops::{BinaryOp, OpError, UnaryOp};
pub use ph_runtime::{DEFAULT_MAX_DEPTH, EvalPolicy, OverflowMode, PolicyError};
pub use ph_types::{CallError, Kwargs, Object, Record, SliceSpec, Value, ValueKind};

/// Operator-level building blocks, for callers that want the native
/// semantics without building a tree.
pub mod ops {
    pub use ph_ops::{
        ArithmeticOp, BinaryFamily, BitwiseOp, Builtin, ComparisonOp, Method, arithmetic,
        binary, bitwise, compare, get_attr, get_item, resolve_method, unary, values_equal,
    };
}

pub mod prelude {
    pub use crate::{
        BinaryOp, CallError, ConstructionError, EvalError, EvalPolicy, Expr, Operand, Slot,
        SliceSpec, UnaryOp, Value, evaluate, evaluate_with_policy,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use super::{ErrorKind, ops};

    #[test]
    fn prelude_covers_the_common_path() {
        let expr = Expr::binary(BinaryOp::Mul, Expr::identity(), 2.5).expect("binary");
        let policy = EvalPolicy::lenient();
        assert_eq!(
            evaluate_with_policy(&expr, &[Value::Int(2)], &policy).expect("eval"),
            Value::Float(5.0)
        );
    }

    #[test]
    fn ops_module_matches_tree_evaluation() {
        let native = ops::binary(
            BinaryOp::Mod,
            &Value::Int(-7),
            &Value::Int(3),
            &EvalPolicy::strict(),
        )
        .expect("native");
        let expr = Expr::binary(BinaryOp::Mod, Expr::identity(), 3).expect("binary");
        assert_eq!(evaluate(&expr, &[Value::Int(-7)]).expect("eval"), native);
    }

    #[test]
    fn construction_errors_surface_through_the_facade() {
        let err = Expr::binary(BinaryOp::Add, 1, 2).expect_err("literals only");
        assert_eq!(err.kind(), ErrorKind::NoPlaceholder);
    }
}
