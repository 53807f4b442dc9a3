#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::sync::Arc;

use ph_runtime::EvalPolicy;
use ph_types::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod methods;

pub use methods::{Builtin, Method, resolve_method};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    Gt,
    Lt,
    Eq,
    Ne,
    Ge,
    Le,
    And,
    Or,
    Xor,
    #[serde(rename = "lshift")]
    LShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Gt,
    Lt,
    Eq,
    Ne,
    Ge,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
    #[serde(rename = "lshift")]
    LShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryFamily {
    Arithmetic(ArithmeticOp),
    Comparison(ComparisonOp),
    Bitwise(BitwiseOp),
}

impl BinaryOp {
    #[must_use]
    pub fn family(self) -> BinaryFamily {
        use BinaryFamily::{Arithmetic, Bitwise, Comparison};

        match self {
            Self::Add => Arithmetic(ArithmeticOp::Add),
            Self::Sub => Arithmetic(ArithmeticOp::Sub),
            Self::Mul => Arithmetic(ArithmeticOp::Mul),
            Self::Div => Arithmetic(ArithmeticOp::Div),
            Self::Pow => Arithmetic(ArithmeticOp::Pow),
            Self::Mod => Arithmetic(ArithmeticOp::Mod),
            Self::Gt => Comparison(ComparisonOp::Gt),
            Self::Lt => Comparison(ComparisonOp::Lt),
            Self::Eq => Comparison(ComparisonOp::Eq),
            Self::Ne => Comparison(ComparisonOp::Ne),
            Self::Ge => Comparison(ComparisonOp::Ge),
            Self::Le => Comparison(ComparisonOp::Le),
            Self::And => Bitwise(BitwiseOp::And),
            Self::Or => Bitwise(BitwiseOp::Or),
            Self::Xor => Bitwise(BitwiseOp::Xor),
            Self::LShift => Bitwise(BitwiseOp::LShift),
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "**",
            Self::Mod => "%",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::LShift => "<<",
        }
    }
}

impl ArithmeticOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "**",
            Self::Mod => "%",
        }
    }
}

impl ComparisonOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }
}

impl BitwiseOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::LShift => "<<",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Abs,
    Invert,
}

impl UnaryOp {
    /// Operator name as it appears in diagnostics.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::Neg => "unary -",
            Self::Abs => "abs()",
            Self::Invert => "unary ~",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OpError {
    #[error("{0}")]
    UnsupportedOperand(String),
    #[error("{0}")]
    DivisionByZero(String),
    #[error("integer overflow in {op}")]
    Overflow { op: &'static str },
    #[error("repeating a sequence {times} times exceeds the size limit")]
    RepeatTooLong { times: i64 },
    #[error("{kind} index {index} out of range for length {len}")]
    IndexOutOfRange {
        kind: ValueKind,
        index: i64,
        len: usize,
    },
    #[error("key {key} not found")]
    KeyNotFound { key: String },
    #[error("'{type_name}' object has no attribute '{name}'")]
    AttributeNotFound { type_name: String, name: String },
}

fn unsupported_pair(symbol: &str, left: &Value, right: &Value) -> OpError {
    OpError::UnsupportedOperand(format!(
        "unsupported operand type(s) for {symbol}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(Self::Int(i64::from(*v))),
            Value::Int(v) => Some(Self::Int(*v)),
            Value::Float(v) => Some(Self::Float(*v)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Exact ordering; ints are never rounded through `f64`.
    fn order(self, other: Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(&b)),
            (Self::Int(a), Self::Float(b)) => int_float_order(a, b),
            (Self::Float(a), Self::Int(b)) => int_float_order(b, a).map(Ordering::reverse),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(&b),
        }
    }
}

/// 2^63, the first float above every `i64`.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn int_float_order(int: i64, float: f64) -> Option<Ordering> {
    if float.is_nan() {
        return None;
    }
    if float >= I64_BOUND {
        return Some(Ordering::Less);
    }
    if float < -I64_BOUND {
        return Some(Ordering::Greater);
    }
    let whole = float.trunc();
    // In range, so the cast is exact.
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => whole.partial_cmp(&float),
        unequal => Some(unequal),
    }
}

/// Apply a binary operator with the value system's native semantics.
pub fn binary(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    policy: &EvalPolicy,
) -> Result<Value, OpError> {
    match op.family() {
        BinaryFamily::Arithmetic(op) => arithmetic(op, left, right, policy),
        BinaryFamily::Comparison(op) => compare(op, left, right).map(Value::Bool),
        BinaryFamily::Bitwise(op) => bitwise(op, left, right, policy),
    }
}

pub fn arithmetic(
    op: ArithmeticOp,
    left: &Value,
    right: &Value,
    policy: &EvalPolicy,
) -> Result<Value, OpError> {
    match (op, left, right) {
        (ArithmeticOp::Add, Value::Str(a), Value::Str(b)) => {
            return Ok(Value::Str(format!("{a}{b}")));
        }
        (ArithmeticOp::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b).cloned().collect()));
        }
        (ArithmeticOp::Mul, Value::Str(text), count) | (ArithmeticOp::Mul, count, Value::Str(text))
            if count.as_int().is_some() =>
        {
            let times = repeat_count(text.len(), count)?;
            let mut out = String::new();
            out.try_reserve_exact(text.len() * times)
                .map_err(|_| repeat_too_long(count))?;
            for _ in 0..times {
                out.push_str(text);
            }
            return Ok(Value::Str(out));
        }
        (ArithmeticOp::Mul, Value::List(items), count)
        | (ArithmeticOp::Mul, count, Value::List(items))
            if count.as_int().is_some() =>
        {
            let times = repeat_count(items.len().saturating_mul(size_of::<Value>()), count)?;
            let mut out = Vec::new();
            out.try_reserve_exact(items.len() * times)
                .map_err(|_| repeat_too_long(count))?;
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            return Ok(Value::List(out));
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
        return Err(unsupported_pair(op.symbol(), left, right));
    };

    match (a, b) {
        (Num::Int(a), Num::Int(b)) => int_arithmetic(op, a, b, policy),
        (a, b) => float_arithmetic(op, a.as_f64(), b.as_f64()),
    }
}

/// Upper bound on the bytes a single repetition may allocate.
pub const MAX_REPEAT_BYTES: usize = 1 << 30;

/// Copies to make of a sequence occupying `unit_bytes`. Negative counts repeat
/// zero times; empty sequences stay empty whatever the count.
fn repeat_count(unit_bytes: usize, count: &Value) -> Result<usize, OpError> {
    let times = count
        .as_int()
        .map_or(0, |n| usize::try_from(n).unwrap_or(0));
    if unit_bytes == 0 {
        return Ok(0);
    }
    match unit_bytes.checked_mul(times) {
        Some(total) if total <= MAX_REPEAT_BYTES => Ok(times),
        _ => Err(repeat_too_long(count)),
    }
}

fn repeat_too_long(count: &Value) -> OpError {
    OpError::RepeatTooLong {
        times: count.as_int().unwrap_or_default(),
    }
}

fn int_arithmetic(
    op: ArithmeticOp,
    a: i64,
    b: i64,
    policy: &EvalPolicy,
) -> Result<Value, OpError> {
    let checked = match op {
        ArithmeticOp::Add => a.checked_add(b),
        ArithmeticOp::Sub => a.checked_sub(b),
        ArithmeticOp::Mul => a.checked_mul(b),
        ArithmeticOp::Div => {
            if b == 0 {
                return Err(OpError::DivisionByZero("division by zero".to_owned()));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        ArithmeticOp::Mod => {
            if b == 0 {
                return Err(OpError::DivisionByZero(
                    "integer modulo by zero".to_owned(),
                ));
            }
            // The remainder takes the sign of the divisor.
            let rem = a.wrapping_rem(b);
            Some(if rem != 0 && (rem < 0) != (b < 0) {
                rem + b
            } else {
                rem
            })
        }
        ArithmeticOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(OpError::DivisionByZero(
                        "zero cannot be raised to a negative power".to_owned(),
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            match a {
                0 | 1 => Some(if b == 0 { 1 } else { a }),
                -1 => Some(if b % 2 == 0 { 1 } else { -1 }),
                _ => u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp)),
            }
        }
    };

    match checked {
        Some(value) => Ok(Value::Int(value)),
        None if policy.promotes_overflow() => float_arithmetic(op, a as f64, b as f64),
        None => Err(OpError::Overflow { op: op.symbol() }),
    }
}

fn float_arithmetic(op: ArithmeticOp, a: f64, b: f64) -> Result<Value, OpError> {
    let value = match op {
        ArithmeticOp::Add => a + b,
        ArithmeticOp::Sub => a - b,
        ArithmeticOp::Mul => a * b,
        ArithmeticOp::Div => {
            if b == 0.0 {
                return Err(OpError::DivisionByZero(
                    "float division by zero".to_owned(),
                ));
            }
            a / b
        }
        ArithmeticOp::Mod => {
            if b == 0.0 {
                return Err(OpError::DivisionByZero("float modulo by zero".to_owned()));
            }
            let rem = a % b;
            if rem != 0.0 && (rem < 0.0) != (b < 0.0) {
                rem + b
            } else {
                rem
            }
        }
        ArithmeticOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(OpError::DivisionByZero(
                    "zero cannot be raised to a negative power".to_owned(),
                ));
            }
            if a < 0.0 && b.is_finite() && b.fract() != 0.0 {
                return Err(OpError::UnsupportedOperand(
                    "negative number cannot be raised to a fractional power".to_owned(),
                ));
            }
            a.powf(b)
        }
    };
    Ok(Value::Float(value))
}

pub fn compare(op: ComparisonOp, left: &Value, right: &Value) -> Result<bool, OpError> {
    match op {
        ComparisonOp::Eq => return Ok(values_equal(left, right)),
        ComparisonOp::Ne => return Ok(!values_equal(left, right)),
        ComparisonOp::Gt | ComparisonOp::Lt | ComparisonOp::Ge | ComparisonOp::Le => {}
    }

    let Some(ordering) = order_values(left, right) else {
        return Err(OpError::UnsupportedOperand(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )));
    };

    // Unordered pairs (NaN) compare false for every ordering operator.
    Ok(ordering.is_some_and(|ordering| match op {
        ComparisonOp::Gt => ordering == Ordering::Greater,
        ComparisonOp::Lt => ordering == Ordering::Less,
        ComparisonOp::Ge => ordering != Ordering::Less,
        ComparisonOp::Le => ordering != Ordering::Greater,
        ComparisonOp::Eq | ComparisonOp::Ne => false,
    }))
}

/// `None` when the pair has no ordering at all, `Some(None)` when the pair is
/// orderable in principle but unordered (NaN).
fn order_values(left: &Value, right: &Value) -> Option<Option<Ordering>> {
    if let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) {
        return Some(a.order(b));
    }

    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b) {
                if !values_equal(x, y) {
                    return order_values(x, y);
                }
            }
            Some(Some(a.len().cmp(&b.len())))
        }
        _ => None,
    }
}

/// The value system's `==`: numbers compare across `bool`/`int`/`float`,
/// containers compare element-wise, host objects compare by identity.
#[must_use]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) {
        return a.order(b) == Some(Ordering::Equal);
    }

    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        (Value::Slice(a), Value::Slice(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

pub fn bitwise(
    op: BitwiseOp,
    left: &Value,
    right: &Value,
    policy: &EvalPolicy,
) -> Result<Value, OpError> {
    if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
        match op {
            BitwiseOp::And => return Ok(Value::Bool(a & b)),
            BitwiseOp::Or => return Ok(Value::Bool(a | b)),
            BitwiseOp::Xor => return Ok(Value::Bool(a ^ b)),
            BitwiseOp::LShift => {}
        }
    }

    let (Some(a), Some(b)) = (left.as_int(), right.as_int()) else {
        return Err(unsupported_pair(op.symbol(), left, right));
    };

    match op {
        BitwiseOp::And => Ok(Value::Int(a & b)),
        BitwiseOp::Or => Ok(Value::Int(a | b)),
        BitwiseOp::Xor => Ok(Value::Int(a ^ b)),
        BitwiseOp::LShift => shift_left(a, b, policy),
    }
}

fn shift_left(a: i64, b: i64, policy: &EvalPolicy) -> Result<Value, OpError> {
    if b < 0 {
        return Err(OpError::UnsupportedOperand("negative shift count".to_owned()));
    }
    if a == 0 {
        return Ok(Value::Int(0));
    }
    if b < 64 {
        let shifted = a << b;
        if shifted >> b == a {
            return Ok(Value::Int(shifted));
        }
    }
    if policy.promotes_overflow() {
        return Ok(Value::Float(a as f64 * 2f64.powf(b as f64)));
    }
    Err(OpError::Overflow { op: "<<" })
}

pub fn unary(op: UnaryOp, operand: &Value, policy: &EvalPolicy) -> Result<Value, OpError> {
    match (op, operand) {
        (UnaryOp::Neg, Value::Float(v)) => return Ok(Value::Float(-v)),
        (UnaryOp::Abs, Value::Float(v)) => return Ok(Value::Float(v.abs())),
        _ => {}
    }

    let Some(value) = operand.as_int() else {
        return Err(OpError::UnsupportedOperand(format!(
            "bad operand type for {}: '{}'",
            op.describe(),
            operand.type_name()
        )));
    };

    let checked = match op {
        UnaryOp::Neg => value.checked_neg(),
        UnaryOp::Abs => value.checked_abs(),
        UnaryOp::Invert => return Ok(Value::Int(!value)),
    };
    match checked {
        Some(result) => Ok(Value::Int(result)),
        // Only i64::MIN gets here; its negation and magnitude are the same.
        None if policy.promotes_overflow() => Ok(Value::Float(-(value as f64))),
        None => Err(OpError::Overflow {
            op: op.describe(),
        }),
    }
}

/// Index a sequence or mapping. Sequences accept integer positions (negative
/// counts from the end) and slices; mappings accept string keys.
pub fn get_item(receiver: &Value, key: &Value) -> Result<Value, OpError> {
    match receiver {
        Value::List(items) => match key {
            Value::Slice(slice) => {
                let positions = slice
                    .indices(items.len())
                    .map_err(|err| OpError::UnsupportedOperand(err.to_string()))?;
                Ok(Value::List(
                    positions
                        .into_iter()
                        .filter_map(|position| items.get(position).cloned())
                        .collect(),
                ))
            }
            other => {
                let position = sequence_position(other, items.len(), ValueKind::List)?;
                items
                    .get(position)
                    .cloned()
                    .ok_or_else(|| out_of_range(other, items.len(), ValueKind::List))
            }
        },
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            match key {
                Value::Slice(slice) => {
                    let positions = slice
                        .indices(chars.len())
                        .map_err(|err| OpError::UnsupportedOperand(err.to_string()))?;
                    Ok(Value::Str(
                        positions
                            .into_iter()
                            .filter_map(|position| chars.get(position))
                            .collect(),
                    ))
                }
                other => {
                    let position = sequence_position(other, chars.len(), ValueKind::Str)?;
                    chars
                        .get(position)
                        .map(|ch| Value::Str(ch.to_string()))
                        .ok_or_else(|| out_of_range(other, chars.len(), ValueKind::Str))
                }
            }
        }
        Value::Map(entries) => {
            let found = match key {
                Value::Str(name) => entries.get(name).cloned(),
                _ => None,
            };
            found.ok_or_else(|| OpError::KeyNotFound {
                key: key.to_string(),
            })
        }
        Value::Object(object) if object.is_subscriptable() => {
            object.get_item(key).ok_or_else(|| OpError::KeyNotFound {
                key: key.to_string(),
            })
        }
        other => Err(OpError::UnsupportedOperand(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn sequence_position(key: &Value, len: usize, kind: ValueKind) -> Result<usize, OpError> {
    let Some(index) = key.as_int() else {
        return Err(OpError::UnsupportedOperand(format!(
            "{kind} indices must be integers or slices, not {}",
            key.type_name()
        )));
    };
    let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
    let adjusted = if index < 0 { index + signed_len } else { index };
    usize::try_from(adjusted)
        .ok()
        .filter(|position| *position < len)
        .ok_or(OpError::IndexOutOfRange { kind, index, len })
}

fn out_of_range(key: &Value, len: usize, kind: ValueKind) -> OpError {
    OpError::IndexOutOfRange {
        kind,
        index: key.as_int().unwrap_or_default(),
        len,
    }
}

/// Look up a named attribute. Numbers expose `real`/`imag` (and integers
/// `numerator`/`denominator`); host objects answer for themselves.
pub fn get_attr(receiver: &Value, name: &str) -> Result<Value, OpError> {
    let found = match (receiver, name) {
        (Value::Object(object), _) => object.get_attr(name),
        (Value::Bool(_) | Value::Int(_), "real" | "numerator") => receiver.as_int().map(Value::Int),
        (Value::Bool(_) | Value::Int(_), "imag") => Some(Value::Int(0)),
        (Value::Bool(_) | Value::Int(_), "denominator") => Some(Value::Int(1)),
        (Value::Float(v), "real") => Some(Value::Float(*v)),
        (Value::Float(_), "imag") => Some(Value::Float(0.0)),
        _ => None,
    };
    found.ok_or_else(|| OpError::AttributeNotFound {
        type_name: receiver.type_name().to_owned(),
        name: name.to_owned(),
    })
}
