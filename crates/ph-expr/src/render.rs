//! Operator-notation rendering of expressions, e.g. `(_0 + 1) >> abs(_0)`.

use std::fmt::{self, Write as _};

use ph_ops::{BinaryFamily, BinaryOp, UnaryOp};
use ph_types::Value;

use crate::{Expr, Node, Operand};

const PIPE: u8 = 0;
const UNARY: u8 = 13;
const ATOM: u8 = 16;

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Pow => 14,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 12,
        BinaryOp::Add | BinaryOp::Sub => 11,
        BinaryOp::LShift => 10,
        BinaryOp::And => 9,
        BinaryOp::Xor => 8,
        BinaryOp::Or => 7,
        BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Ge | BinaryOp::Le => 6,
    }
}

fn stage_precedence(node: &Node) -> u8 {
    match node {
        Node::Binary { op, .. } => binary_precedence(*op),
        Node::Unary {
            op: UnaryOp::Neg | UnaryOp::Invert,
            ..
        } => UNARY,
        Node::Identity(_)
        | Node::Unary {
            op: UnaryOp::Abs, ..
        }
        | Node::GetItem { .. }
        | Node::GetAttr { .. }
        | Node::MethodCall { .. }
        | Node::Apply { .. } => ATOM,
    }
}

fn expr_precedence(expr: &Expr) -> u8 {
    if expr.next.is_some() {
        PIPE
    } else {
        stage_precedence(&expr.node)
    }
}

fn operand_precedence(operand: &Operand) -> u8 {
    match operand {
        Operand::Expr(expr) => expr_precedence(expr),
        // A leading minus sign binds like unary negation.
        Operand::Literal(Value::Int(v)) if *v < 0 => UNARY,
        Operand::Literal(Value::Float(v)) if v.is_sign_negative() => UNARY,
        Operand::Literal(_) => ATOM,
    }
}

pub(crate) fn stage_to_string(stage: &Expr) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write!(out, "{}", StageDisplay(stage));
    out
}

struct StageDisplay<'a>(&'a Expr);

impl fmt::Display for StageDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stage(f, self.0)
    }
}

pub(crate) fn write_expr(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    if expr.next.is_none() {
        return write_stage(f, expr);
    }
    for (idx, stage) in expr.stages().enumerate() {
        if idx > 0 {
            f.write_str(" >> ")?;
        }
        if stage_precedence(&stage.node) < ATOM {
            f.write_str("(")?;
            write_stage(f, stage)?;
            f.write_str(")")?;
        } else {
            write_stage(f, stage)?;
        }
    }
    Ok(())
}

fn write_child(f: &mut fmt::Formatter<'_>, expr: &Expr, parens: bool) -> fmt::Result {
    if parens {
        f.write_str("(")?;
        write_expr(f, expr)?;
        f.write_str(")")
    } else {
        write_expr(f, expr)
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, operand: &Operand, parens: bool) -> fmt::Result {
    match operand {
        Operand::Expr(expr) => write_child(f, expr, parens),
        Operand::Literal(value) if parens => write!(f, "({value})"),
        Operand::Literal(value) => write!(f, "{value}"),
    }
}

fn write_stage(f: &mut fmt::Formatter<'_>, stage: &Expr) -> fmt::Result {
    match &stage.node {
        Node::Identity(slot) => write!(f, "{slot}"),
        Node::Binary { op, left, right } => {
            let prec = binary_precedence(*op);
            let right_assoc = *op == BinaryOp::Pow;
            let chained = matches!(op.family(), BinaryFamily::Comparison(_));

            let left_prec = operand_precedence(left);
            let right_prec = operand_precedence(right);
            let left_parens = left_prec < prec || (left_prec == prec && (right_assoc || chained));
            let right_parens = right_prec < prec || (right_prec == prec && !right_assoc);

            write_operand(f, left, left_parens)?;
            write!(f, " {} ", op.symbol())?;
            write_operand(f, right, right_parens)
        }
        Node::Unary {
            op: UnaryOp::Abs,
            operand,
        } => {
            f.write_str("abs(")?;
            write_expr(f, operand)?;
            f.write_str(")")
        }
        Node::Unary { op, operand } => {
            f.write_str(if *op == UnaryOp::Neg { "-" } else { "~" })?;
            write_child(f, operand, expr_precedence(operand) < ATOM)
        }
        Node::GetItem { receiver, key } => {
            write_child(f, receiver, expr_precedence(receiver) < ATOM)?;
            f.write_str("[")?;
            write_operand(f, key, false)?;
            f.write_str("]")
        }
        Node::GetAttr { receiver, name } => {
            write_child(f, receiver, expr_precedence(receiver) < ATOM)?;
            write!(f, ".{name}")
        }
        Node::MethodCall {
            receiver,
            name,
            args,
            kwargs,
        } => {
            write_child(f, receiver, expr_precedence(receiver) < ATOM)?;
            write!(f, ".{name}(")?;
            let mut first = true;
            for arg in args {
                if !first {
                    f.write_str(", ")?;
                }
                first = false;
                write_operand(f, arg, false)?;
            }
            for (key, arg) in kwargs {
                if !first {
                    f.write_str(", ")?;
                }
                first = false;
                write!(f, "{key}=")?;
                write_operand(f, arg, false)?;
            }
            f.write_str(")")
        }
        Node::Apply { func, arg } => {
            write!(f, "{}(", func.name())?;
            write_expr(f, arg)?;
            f.write_str(")")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ph_ops::{BinaryOp, UnaryOp};
    use ph_types::{SliceSpec, Value};

    use crate::{Expr, Operand, Slot};

    fn x() -> Expr {
        Expr::identity()
    }

    fn bin(op: BinaryOp, left: impl Into<Operand>, right: impl Into<Operand>) -> Expr {
        Expr::binary(op, left, right).expect("binary")
    }

    #[test]
    fn renders_operators_with_minimal_parentheses() {
        let sum = bin(BinaryOp::Add, x(), 1);
        assert_eq!(sum.to_string(), "_0 + 1");
        assert_eq!(bin(BinaryOp::Mul, sum.clone(), 2).to_string(), "(_0 + 1) * 2");
        assert_eq!(bin(BinaryOp::Add, 2, bin(BinaryOp::Mul, x(), 3)).to_string(), "2 + _0 * 3");
        assert_eq!(
            bin(BinaryOp::Sub, 10, bin(BinaryOp::Sub, x(), 1)).to_string(),
            "10 - (_0 - 1)"
        );
        assert_eq!(
            bin(BinaryOp::Pow, x(), bin(BinaryOp::Pow, x(), 2)).to_string(),
            "_0 ** _0 ** 2"
        );
        assert_eq!(bin(BinaryOp::Pow, -2, x()).to_string(), "(-2) ** _0");
        assert_eq!(
            bin(BinaryOp::Lt, x(), Expr::slot(Slot::SECOND)).to_string(),
            "_0 < _1"
        );
    }

    #[test]
    fn renders_unary_forms() {
        assert_eq!(Expr::unary(UnaryOp::Neg, x()).to_string(), "-_0");
        assert_eq!(
            Expr::unary(UnaryOp::Invert, bin(BinaryOp::Add, x(), 1)).to_string(),
            "~(_0 + 1)"
        );
        assert_eq!(
            Expr::unary(UnaryOp::Abs, bin(BinaryOp::Sub, x(), 1)).to_string(),
            "abs(_0 - 1)"
        );
    }

    #[test]
    fn renders_access_and_calls() {
        assert_eq!(
            x().item(SliceSpec::new(Some(1), Some(3))).expect("item").to_string(),
            "_0[1:3]"
        );
        assert_eq!(x().item("key").expect("item").to_string(), "_0['key']");
        assert_eq!(
            bin(BinaryOp::Add, x(), 1).attr("real").to_string(),
            "(_0 + 1).real"
        );

        let mut kwargs = BTreeMap::new();
        kwargs.insert("maxsplit".to_owned(), Operand::from(1));
        let split =
            Expr::method_call(x(), "split", vec![Operand::from(Value::from(","))], kwargs)
                .expect("method");
        assert_eq!(split.to_string(), "_0.split(',', maxsplit=1)");
        assert_eq!(x().method("upper", []).expect("method").to_string(), "_0.upper()");
    }

    #[test]
    fn renders_pipelines_stage_by_stage() {
        let chain = Expr::pipe(bin(BinaryOp::Add, x(), 1), bin(BinaryOp::Mul, x(), 2))
            .expect("pipe")
            .map("str", Ok);
        assert_eq!(chain.to_string(), "(_0 + 1) >> (_0 * 2) >> str(_0)");

        let nested = bin(BinaryOp::Mul, Expr::pipe(x(), Expr::unary(UnaryOp::Abs, x())).expect("pipe"), 2);
        assert_eq!(nested.to_string(), "(_0 >> abs(_0)) * 2");
    }
}
