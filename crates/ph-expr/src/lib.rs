#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use ph_ops::{BinaryOp, OpError, UnaryOp};
use ph_runtime::EvalPolicy;
use ph_types::{CallError, Kwargs, SliceSpec, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod render;

/// Identity of a base placeholder. Inputs bind to referenced slots in
/// ascending slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot(pub u16);

impl Slot {
    pub const FIRST: Self = Self(0);
    pub const SECOND: Self = Self(1);

    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}", self.0)
    }
}

/// The distinct slots an expression references, ascending. Never more than two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotSet {
    slots: [Slot; 2],
    len: u8,
}

impl SlotSet {
    pub const EMPTY: Self = Self {
        slots: [Slot::FIRST; 2],
        len: 0,
    };

    #[must_use]
    pub const fn single(slot: Slot) -> Self {
        Self {
            slots: [slot; 2],
            len: 1,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Slot] {
        &self.slots[..self.len()]
    }

    pub fn iter(&self) -> impl Iterator<Item = Slot> + '_ {
        self.as_slice().iter().copied()
    }

    #[must_use]
    pub fn contains(&self, slot: Slot) -> bool {
        self.as_slice().contains(&slot)
    }

    #[must_use]
    pub fn position(&self, slot: Slot) -> Option<usize> {
        self.as_slice().iter().position(|candidate| *candidate == slot)
    }

    pub fn union(self, other: Self) -> Result<Self, ConstructionError> {
        Self::collect(self.iter().chain(other.iter()))
    }

    fn collect(slots: impl IntoIterator<Item = Slot>) -> Result<Self, ConstructionError> {
        let distinct: BTreeSet<Slot> = slots.into_iter().collect();
        let mut set = Self::EMPTY;
        for slot in &distinct {
            match set.len {
                0 | 1 => {
                    set.slots[set.len()] = *slot;
                    set.len += 1;
                }
                _ => {
                    return Err(ConstructionError::TooManyReferences {
                        count: distinct.len(),
                    });
                }
            }
        }
        Ok(set)
    }
}

impl IntoIterator for SlotSet {
    type Item = Slot;
    type IntoIter = std::iter::Take<std::array::IntoIter<Slot, 2>>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter().take(self.len())
    }
}

/// A host function usable as a pipeline stage.
#[derive(Clone)]
pub struct HostFn {
    name: String,
    func: Arc<dyn Fn(Value) -> Result<Value, CallError> + Send + Sync>,
}

impl HostFn {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, value: Value) -> Result<Value, CallError> {
        (self.func)(value)
    }
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFn").field("name", &self.name).finish()
    }
}

/// One side of an operation: a fixed value or a sub-expression, never both.
#[derive(Debug, Clone)]
pub enum Operand {
    Literal(Value),
    Expr(Box<Expr>),
}

impl Operand {
    #[must_use]
    pub fn slots(&self) -> SlotSet {
        match self {
            Self::Literal(_) => SlotSet::EMPTY,
            Self::Expr(expr) => expr.slots,
        }
    }
}

impl From<Expr> for Operand {
    fn from(expr: Expr) -> Self {
        Self::Expr(Box::new(expr))
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

macro_rules! literal_operand {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Self::Literal(Value::from(value))
                }
            }
        )*
    };
}

literal_operand!(bool, i32, i64, f64, &str, String, SliceSpec, Vec<Value>);

#[derive(Debug, Clone)]
pub enum Node {
    Identity(Slot),
    Binary {
        op: BinaryOp,
        left: Operand,
        right: Operand,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    GetItem {
        receiver: Box<Expr>,
        key: Operand,
    },
    GetAttr {
        receiver: Box<Expr>,
        name: String,
    },
    MethodCall {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Operand>,
        kwargs: BTreeMap<String, Operand>,
    },
    Apply {
        func: HostFn,
        arg: Box<Expr>,
    },
}

impl Node {
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Identity(_) => Operation::Identity,
            Self::Binary { op, .. } => Operation::from(*op),
            Self::Unary { op, .. } => Operation::from(*op),
            Self::GetItem { .. } => Operation::GetItem,
            Self::GetAttr { .. } => Operation::GetAttr,
            Self::MethodCall { .. } => Operation::MethodCall,
            Self::Apply { .. } => Operation::Apply,
        }
    }
}

/// The closed tag of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Identity,
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
    Neg,
    Abs,
    Invert,
    #[serde(rename = "getitem")]
    GetItem,
    #[serde(rename = "getattr")]
    GetAttr,
    MethodCall,
    Apply,
    Pipe,
}

impl Operation {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Pow => "pow",
            Self::Mod => "mod",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Ge => "ge",
            Self::Le => "le",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::LShift => "lshift",
            Self::Neg => "neg",
            Self::Abs => "abs",
            Self::Invert => "invert",
            Self::GetItem => "getitem",
            Self::GetAttr => "getattr",
            Self::MethodCall => "method_call",
            Self::Apply => "apply",
            Self::Pipe => "pipe",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<BinaryOp> for Operation {
    fn from(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => Self::Add,
            BinaryOp::Sub => Self::Sub,
            BinaryOp::Mul => Self::Mul,
            BinaryOp::Div => Self::Div,
            BinaryOp::Pow => Self::Pow,
            BinaryOp::Mod => Self::Mod,
            BinaryOp::Gt => Self::Gt,
            BinaryOp::Lt => Self::Lt,
            BinaryOp::Eq => Self::Eq,
            BinaryOp::Ne => Self::Ne,
            BinaryOp::Ge => Self::Ge,
            BinaryOp::Le => Self::Le,
            BinaryOp::And => Self::And,
            BinaryOp::Or => Self::Or,
            BinaryOp::Xor => Self::Xor,
            BinaryOp::LShift => Self::LShift,
        }
    }
}

impl From<UnaryOp> for Operation {
    fn from(op: UnaryOp) -> Self {
        match op {
            UnaryOp::Neg => Self::Neg,
            UnaryOp::Abs => Self::Abs,
            UnaryOp::Invert => Self::Invert,
        }
    }
}

/// A deferred computation over one or two placeholder inputs.
///
/// An expression is a first-stage [`Node`], the slots that stage references,
/// and an optional pipeline successor that receives the stage's result as
/// its only input. Expressions are immutable once built; every constructor
/// consumes its inputs and returns a new tree.
#[derive(Debug)]
pub struct Expr {
    node: Node,
    slots: SlotSet,
    next: Option<Box<Expr>>,
}

impl Expr {
    /// The base placeholder for [`Slot::FIRST`].
    #[must_use]
    pub fn identity() -> Self {
        Self::slot(Slot::FIRST)
    }

    #[must_use]
    pub fn slot(slot: Slot) -> Self {
        Self::stage(Node::Identity(slot), SlotSet::single(slot))
    }

    fn stage(node: Node, slots: SlotSet) -> Self {
        Self {
            node,
            slots,
            next: None,
        }
    }

    /// Combine two operands. Referencing the same slot on both sides keeps the
    /// expression single-input.
    pub fn binary(
        op: BinaryOp,
        left: impl Into<Operand>,
        right: impl Into<Operand>,
    ) -> Result<Self, ConstructionError> {
        let left = left.into();
        let right = right.into();
        let slots = left.slots().union(right.slots())?;
        if slots.is_empty() {
            return Err(ConstructionError::NoPlaceholder {
                operation: Operation::from(op),
            });
        }
        Ok(Self::stage(Node::Binary { op, left, right }, slots))
    }

    #[must_use]
    pub fn unary(op: UnaryOp, operand: Self) -> Self {
        let slots = operand.slots;
        Self::stage(
            Node::Unary {
                op,
                operand: Box::new(operand),
            },
            slots,
        )
    }

    pub fn get_item(receiver: Self, key: impl Into<Operand>) -> Result<Self, ConstructionError> {
        let key = key.into();
        let slots = receiver.slots.union(key.slots())?;
        Ok(Self::stage(
            Node::GetItem {
                receiver: Box::new(receiver),
                key,
            },
            slots,
        ))
    }

    #[must_use]
    pub fn get_attr(receiver: Self, name: impl Into<String>) -> Self {
        let slots = receiver.slots;
        Self::stage(
            Node::GetAttr {
                receiver: Box::new(receiver),
                name: name.into(),
            },
            slots,
        )
    }

    pub fn method_call(
        receiver: Self,
        name: impl Into<String>,
        args: Vec<Operand>,
        kwargs: BTreeMap<String, Operand>,
    ) -> Result<Self, ConstructionError> {
        let slots = SlotSet::collect(
            receiver
                .slots
                .iter()
                .chain(args.iter().flat_map(Operand::slots))
                .chain(kwargs.values().flat_map(Operand::slots)),
        )?;
        Ok(Self::stage(
            Node::MethodCall {
                receiver: Box::new(receiver),
                name: name.into(),
                args,
                kwargs,
            },
            slots,
        ))
    }

    /// A single-input stage that hands its input to a host function.
    pub fn apply<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Self::apply_host(HostFn::new(name, func))
    }

    #[must_use]
    pub fn apply_host(func: HostFn) -> Self {
        Self::stage(
            Node::Apply {
                func,
                arg: Box::new(Self::identity()),
            },
            SlotSet::single(Slot::FIRST),
        )
    }

    /// Feed the result of `first` into `second`. `second` must take exactly
    /// one input; it is appended after the last stage of `first`, so each
    /// call walks the existing chain. Use [`Expr::pipeline`] to build long
    /// chains.
    pub fn pipe(mut first: Self, second: Self) -> Result<Self, ConstructionError> {
        check_downstream(&second)?;
        first.push_stage(second);
        Ok(first)
    }

    /// Chain `first` and every stage of `rest` in order, linking each stage
    /// once. Every element of `rest` must take exactly one input.
    pub fn pipeline(
        first: Self,
        rest: impl IntoIterator<Item = Self>,
    ) -> Result<Self, ConstructionError> {
        let rest: Vec<Self> = rest.into_iter().collect();
        rest.iter().try_for_each(check_downstream)?;
        let tail = rest.into_iter().rev().fold(None, |next, mut stage: Self| {
            if let Some(next) = next {
                stage.push_boxed(next);
            }
            Some(Box::new(stage))
        });
        let mut head = first;
        if let Some(tail) = tail {
            head.push_boxed(tail);
        }
        Ok(head)
    }

    fn push_stage(&mut self, stage: Self) {
        self.push_boxed(Box::new(stage));
    }

    fn push_boxed(&mut self, stage: Box<Self>) {
        let mut tail = &mut self.next;
        while let Some(next) = tail {
            tail = &mut next.next;
        }
        *tail = Some(stage);
    }

    pub fn then(self, next: Self) -> Result<Self, ConstructionError> {
        Self::pipe(self, next)
    }

    /// Append a host function stage. Cannot fail: the stage always takes one input.
    #[must_use]
    pub fn map<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.push_stage(Self::apply(name, func));
        self
    }

    #[must_use]
    pub fn attr(self, name: impl Into<String>) -> Self {
        Self::get_attr(self, name)
    }

    pub fn item(self, key: impl Into<Operand>) -> Result<Self, ConstructionError> {
        Self::get_item(self, key)
    }

    pub fn method(
        self,
        name: impl Into<String>,
        args: impl IntoIterator<Item = Operand>,
    ) -> Result<Self, ConstructionError> {
        Self::method_call(self, name, args.into_iter().collect(), BTreeMap::new())
    }

    /// Number of inputs evaluation requires: the distinct slots the first
    /// stage references.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn slots(&self) -> SlotSet {
        self.slots
    }

    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    #[must_use]
    pub fn next(&self) -> Option<&Self> {
        self.next.as_deref()
    }

    /// `Pipe` for a pipeline, otherwise the tag of the only stage.
    #[must_use]
    pub fn operation(&self) -> Operation {
        if self.next.is_some() {
            Operation::Pipe
        } else {
            self.node.operation()
        }
    }

    pub fn stages(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |stage| stage.next())
    }

    pub fn eval(&self, inputs: &[Value]) -> Result<Value, EvalError> {
        evaluate(self, inputs)
    }
}

fn check_downstream(stage: &Expr) -> Result<(), ConstructionError> {
    if stage.arity() == 1 {
        Ok(())
    } else {
        Err(ConstructionError::ArityMismatch {
            expected: 1,
            found: stage.arity(),
        })
    }
}

// Pipelines are linked lists; clone and drop walk them in a loop so chain
// length never reaches the call stack.
impl Clone for Expr {
    fn clone(&self) -> Self {
        let rest: Vec<&Self> = self.stages().skip(1).collect();
        let next = rest.into_iter().rev().fold(None, |next, stage| {
            Some(Box::new(Self {
                node: stage.node.clone(),
                slots: stage.slots,
                next,
            }))
        });
        Self {
            node: self.node.clone(),
            slots: self.slots,
            next,
        }
    }
}

impl Drop for Expr {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut stage) = next {
            next = stage.next.take();
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render::write_expr(f, self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TooManyReferences,
    NoPlaceholder,
    ArityMismatch,
    UnsupportedOperand,
    DivisionByZero,
    Overflow,
    IndexError,
    KeyLookupError,
    AttributeNotFound,
    CallFailed,
    DepthExceeded,
    UnboundPlaceholder,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("expression references {count} distinct placeholders, at most 2 are supported")]
    TooManyReferences { count: usize },
    #[error("pipeline stage takes {found} inputs but the previous stage produces {expected}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("{operation} needs at least one placeholder operand")]
    NoPlaceholder { operation: Operation },
}

impl ConstructionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TooManyReferences { .. } => ErrorKind::TooManyReferences,
            Self::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            Self::NoPlaceholder { .. } => ErrorKind::NoPlaceholder,
        }
    }
}

/// Evaluation failure. Every variant raised by a node records that node's
/// rendering and operation tag.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("expression takes {expected} input(s) but {supplied} were supplied")]
    ArityMismatch { expected: usize, supplied: usize },
    #[error("{operation} failed at `{node}`: {detail}")]
    UnsupportedOperand {
        operation: Operation,
        node: String,
        detail: String,
    },
    #[error("{detail} at `{node}`")]
    DivisionByZero {
        operation: Operation,
        node: String,
        detail: String,
    },
    #[error("{detail} at `{node}`")]
    Overflow {
        operation: Operation,
        node: String,
        detail: String,
    },
    #[error("index {index} out of range for length {len} at `{node}`")]
    IndexError {
        operation: Operation,
        node: String,
        index: i64,
        len: usize,
    },
    #[error("key {key} not found at `{node}`")]
    KeyLookupError {
        operation: Operation,
        node: String,
        key: String,
    },
    #[error("'{type_name}' object has no attribute '{name}' at `{node}`")]
    AttributeNotFound {
        operation: Operation,
        node: String,
        type_name: String,
        name: String,
    },
    #[error("call to {callee} failed at `{node}`: {source}")]
    CallFailed {
        operation: Operation,
        node: String,
        callee: String,
        #[source]
        source: CallError,
    },
    #[error("nesting depth limit {limit} exceeded at `{node}`")]
    DepthExceeded {
        operation: Operation,
        node: String,
        limit: usize,
    },
    #[error("placeholder {slot} has no bound input")]
    UnboundPlaceholder { slot: Slot },
}

impl EvalError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            Self::UnsupportedOperand { .. } => ErrorKind::UnsupportedOperand,
            Self::DivisionByZero { .. } => ErrorKind::DivisionByZero,
            Self::Overflow { .. } => ErrorKind::Overflow,
            Self::IndexError { .. } => ErrorKind::IndexError,
            Self::KeyLookupError { .. } => ErrorKind::KeyLookupError,
            Self::AttributeNotFound { .. } => ErrorKind::AttributeNotFound,
            Self::CallFailed { .. } => ErrorKind::CallFailed,
            Self::DepthExceeded { .. } => ErrorKind::DepthExceeded,
            Self::UnboundPlaceholder { .. } => ErrorKind::UnboundPlaceholder,
        }
    }

    /// Tag of the node that failed, when the failure belongs to a node.
    #[must_use]
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::UnsupportedOperand { operation, .. }
            | Self::DivisionByZero { operation, .. }
            | Self::Overflow { operation, .. }
            | Self::IndexError { operation, .. }
            | Self::KeyLookupError { operation, .. }
            | Self::AttributeNotFound { operation, .. }
            | Self::CallFailed { operation, .. }
            | Self::DepthExceeded { operation, .. } => Some(*operation),
            Self::ArityMismatch { .. } | Self::UnboundPlaceholder { .. } => None,
        }
    }

    /// Rendering of the node that failed.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::UnsupportedOperand { node, .. }
            | Self::DivisionByZero { node, .. }
            | Self::Overflow { node, .. }
            | Self::IndexError { node, .. }
            | Self::KeyLookupError { node, .. }
            | Self::AttributeNotFound { node, .. }
            | Self::CallFailed { node, .. }
            | Self::DepthExceeded { node, .. } => Some(node),
            Self::ArityMismatch { .. } | Self::UnboundPlaceholder { .. } => None,
        }
    }

    fn at(stage: &Expr, err: OpError) -> Self {
        let operation = stage.node.operation();
        let node = render::stage_to_string(stage);
        match err {
            OpError::UnsupportedOperand(detail) => Self::UnsupportedOperand {
                operation,
                node,
                detail,
            },
            OpError::DivisionByZero(detail) => Self::DivisionByZero {
                operation,
                node,
                detail,
            },
            OpError::Overflow { .. } | OpError::RepeatTooLong { .. } => Self::Overflow {
                operation,
                node,
                detail: err.to_string(),
            },
            OpError::IndexOutOfRange { index, len, .. } => Self::IndexError {
                operation,
                node,
                index,
                len,
            },
            OpError::KeyNotFound { key } => Self::KeyLookupError {
                operation,
                node,
                key,
            },
            OpError::AttributeNotFound { type_name, name } => Self::AttributeNotFound {
                operation,
                node,
                type_name,
                name,
            },
        }
    }

    fn call_failed(stage: &Expr, callee: &str, source: CallError) -> Self {
        Self::CallFailed {
            operation: stage.node.operation(),
            node: render::stage_to_string(stage),
            callee: callee.to_owned(),
            source,
        }
    }
}

/// Evaluate under the default (strict) policy.
pub fn evaluate(expr: &Expr, inputs: &[Value]) -> Result<Value, EvalError> {
    evaluate_with_policy(expr, inputs, &EvalPolicy::default())
}

pub fn evaluate_with_policy(
    expr: &Expr,
    inputs: &[Value],
    policy: &EvalPolicy,
) -> Result<Value, EvalError> {
    #[cfg(feature = "tracing")]
    tracing::trace!(expr = %expr, inputs = inputs.len(), "evaluating placeholder expression");

    let result = Evaluator { policy }.run(expr, inputs);

    #[cfg(feature = "tracing")]
    if let Err(err) = &result {
        tracing::debug!(expr = %expr, kind = ?err.kind(), error = %err, "placeholder evaluation failed");
    }

    result
}

/// Inputs bound to the slots of the stage being evaluated.
#[derive(Debug, Clone, Copy)]
struct Bindings<'v> {
    slots: SlotSet,
    values: [Option<&'v Value>; 2],
}

impl<'v> Bindings<'v> {
    fn new(slots: SlotSet, inputs: &'v [Value]) -> Self {
        let mut values = [None; 2];
        for (value, input) in values.iter_mut().zip(inputs) {
            *value = Some(input);
        }
        Self { slots, values }
    }

    fn lookup(&self, slot: Slot) -> Option<&'v Value> {
        self.slots
            .position(slot)
            .and_then(|position| self.values[position])
    }
}

struct Evaluator<'p> {
    policy: &'p EvalPolicy,
}

impl Evaluator<'_> {
    fn run(&self, expr: &Expr, inputs: &[Value]) -> Result<Value, EvalError> {
        if inputs.len() != expr.arity() {
            return Err(EvalError::ArityMismatch {
                expected: expr.arity(),
                supplied: inputs.len(),
            });
        }
        self.eval_expr(expr, Bindings::new(expr.slots, inputs), 0)
    }

    /// First stage against `bindings`, then each successor with the previous
    /// result as its single input.
    fn eval_expr(&self, expr: &Expr, bindings: Bindings<'_>, depth: usize) -> Result<Value, EvalError> {
        let mut value = self.eval_stage(expr, bindings, depth)?;
        let mut stage = expr.next();
        while let Some(current) = stage {
            let bindings = Bindings::new(current.slots, std::slice::from_ref(&value));
            let next = self.eval_stage(current, bindings, depth)?;
            value = next;
            stage = current.next();
        }
        Ok(value)
    }

    fn eval_stage(&self, stage: &Expr, bindings: Bindings<'_>, depth: usize) -> Result<Value, EvalError> {
        if !self.policy.allows_depth(depth) {
            return Err(EvalError::DepthExceeded {
                operation: stage.node.operation(),
                node: render::stage_to_string(stage),
                limit: self.policy.max_depth.unwrap_or(depth),
            });
        }
        let child = depth + 1;

        match &stage.node {
            Node::Identity(slot) => bindings
                .lookup(*slot)
                .cloned()
                .ok_or(EvalError::UnboundPlaceholder { slot: *slot }),
            Node::Binary { op, left, right } => {
                let lhs = self.eval_operand(left, bindings, child)?;
                let rhs = self.eval_operand(right, bindings, child)?;
                ph_ops::binary(*op, &lhs, &rhs, self.policy).map_err(|err| EvalError::at(stage, err))
            }
            Node::Unary { op, operand } => {
                let value = self.eval_expr(operand, bindings, child)?;
                ph_ops::unary(*op, &value, self.policy).map_err(|err| EvalError::at(stage, err))
            }
            Node::GetItem { receiver, key } => {
                let receiver = self.eval_expr(receiver, bindings, child)?;
                let key = self.eval_operand(key, bindings, child)?;
                ph_ops::get_item(&receiver, &key).map_err(|err| EvalError::at(stage, err))
            }
            Node::GetAttr { receiver, name } => {
                let receiver = self.eval_expr(receiver, bindings, child)?;
                ph_ops::get_attr(&receiver, name).map_err(|err| EvalError::at(stage, err))
            }
            Node::MethodCall {
                receiver,
                name,
                args,
                kwargs,
            } => {
                let receiver = self.eval_expr(receiver, bindings, child)?;
                let method = ph_ops::resolve_method(&receiver, name)
                    .map_err(|err| EvalError::at(stage, err))?;

                let args = args
                    .iter()
                    .map(|arg| {
                        self.eval_operand(arg, bindings, child)
                            .map(Cow::into_owned)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let mut evaluated = Kwargs::new();
                for (key, arg) in kwargs {
                    let value = self.eval_operand(arg, bindings, child)?;
                    evaluated.insert(key.clone(), value.into_owned());
                }

                method
                    .call(&args, &evaluated)
                    .map_err(|source| EvalError::call_failed(stage, name, source))
            }
            Node::Apply { func, arg } => {
                let value = self.eval_expr(arg, bindings, child)?;
                func.call(value)
                    .map_err(|source| EvalError::call_failed(stage, func.name(), source))
            }
        }
    }

    fn eval_operand<'e>(
        &self,
        operand: &'e Operand,
        bindings: Bindings<'_>,
        depth: usize,
    ) -> Result<Cow<'e, Value>, EvalError> {
        match operand {
            Operand::Literal(value) => Ok(Cow::Borrowed(value)),
            Operand::Expr(expr) => self.eval_expr(expr, bindings, depth).map(Cow::Owned),
        }
    }
}
