#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keyword arguments passed to a method call. Names are unique by construction.
pub type Kwargs = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    None,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Slice,
    Object,
}

impl ValueKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::Map => "map",
            Self::Slice => "slice",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `start:stop:step` indexing key with Python slice semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SliceSpec {
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub stop: Option<i64>,
    #[serde(default)]
    pub step: Option<i64>,
}

impl SliceSpec {
    #[must_use]
    pub const fn new(start: Option<i64>, stop: Option<i64>) -> Self {
        Self {
            start,
            stop,
            step: None,
        }
    }

    #[must_use]
    pub const fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Resolve the slice against a sequence of `len` elements and return the
    /// selected positions in iteration order.
    pub fn indices(&self, len: usize) -> Result<Vec<usize>, TypeError> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(TypeError::ZeroSliceStep);
        }

        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
        let clamp = |bound: i64| {
            if bound < 0 {
                bound.saturating_add(len).max(lower)
            } else {
                bound.min(upper)
            }
        };

        let start = self
            .start
            .map_or(if step > 0 { lower } else { upper }, clamp);
        let stop = self.stop.map_or(if step > 0 { upper } else { lower }, clamp);

        let mut positions = Vec::new();
        let mut cursor = start;
        while (step > 0 && cursor < stop) || (step < 0 && cursor > stop) {
            // `cursor` is inside [0, len) here, so the conversion cannot fail.
            if let Ok(position) = usize::try_from(cursor) {
                positions.push(position);
            }
            match cursor.checked_add(step) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        Ok(positions)
    }
}

impl fmt::Display for SliceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |value: Option<i64>| value.map_or_else(String::new, |v| v.to_string());
        write!(f, "{}:{}", bound(self.start), bound(self.stop))?;
        if let Some(step) = self.step {
            write!(f, ":{step}")?;
        }
        Ok(())
    }
}

/// Failure raised by an invoked method or host function.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CallError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CallError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A host-defined value reachable through attribute lookup and method dispatch.
///
/// Implementations must be `Send + Sync`: expressions holding objects as
/// literals are shared across threads without locking.
pub trait Object: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn is_subscriptable(&self) -> bool {
        false
    }

    /// Only called when [`Object::is_subscriptable`] is `true`. `None` means
    /// the key is absent.
    fn get_item(&self, _key: &Value) -> Option<Value> {
        None
    }

    /// Only called for names where [`Object::has_method`] returned `true`.
    fn call_method(&self, name: &str, _args: &[Value], _kwargs: &Kwargs) -> Result<Value, CallError> {
        Err(CallError::new(format!(
            "'{}' object has no method '{name}'",
            self.type_name()
        )))
    }
}

/// A plain named-field object. Fields are exposed as attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: String,
    fields: BTreeMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(Arc::new(self))
    }
}

impl Object for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Slice(SliceSpec),
    #[serde(skip)]
    Object(Arc<dyn Object>),
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::None => ValueKind::None,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
            Self::Slice(_) => ValueKind::Slice,
            Self::Object(_) => ValueKind::Object,
        }
    }

    /// Name used in diagnostics; host objects report their own type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Object(object) => object.type_name(),
            other => other.kind().name(),
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Integer view of the value; `bool` counts as `0`/`1`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(value) => Some(i64::from(*value)),
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Structural equality plus pointer identity for host objects.
    ///
    /// This is not the `==` operator of the value system: `Int(1)` and
    /// `Float(1.0)` are different values here.
    #[must_use]
    pub fn identical(&self, other: &Self) -> bool {
        self == other
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Slice(a), Self::Slice(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write_float(f, *value),
            Self::Str(value) => write_quoted(f, value),
            Self::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write_quoted(f, key)?;
                    write!(f, ": {value}")?;
                }
                f.write_str("}")
            }
            Self::Slice(slice) => write!(f, "{slice}"),
            Self::Object(object) => write!(f, "<{} object>", object.type_name()),
        }
    }
}

/// Shortest round-trip digits, switching to an exponent outside
/// `1e-4 <= |x| < 1e16` with a signed, two-digit exponent.
fn write_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_nan() {
        return f.write_str("nan");
    }
    if value.is_infinite() {
        return f.write_str(if value > 0.0 { "inf" } else { "-inf" });
    }
    let text = format!("{value:?}");
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            write!(f, "{mantissa}e{sign}{digits:0>2}")
        }
        None => f.write_str(&text),
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("'")?;
    for ch in value.chars() {
        match ch {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("'")
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::List(values)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self::Map(entries)
    }
}

impl From<SliceSpec> for Value {
    fn from(slice: SliceSpec) -> Self {
        Self::Slice(slice)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_value()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("slice step cannot be zero")]
    ZeroSliceStep,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::{Object, Record, SliceSpec, TypeError, Value, ValueKind};

    #[test]
    fn slice_indices_follow_sequence_rules() {
        let slice = SliceSpec::new(Some(1), Some(3));
        assert_eq!(slice.indices(4).expect("slice"), vec![1, 2]);

        let tail = SliceSpec::new(Some(-2), None);
        assert_eq!(tail.indices(5).expect("slice"), vec![3, 4]);

        let clamped = SliceSpec::new(Some(-10), Some(100));
        assert_eq!(clamped.indices(3).expect("slice"), vec![0, 1, 2]);

        let empty = SliceSpec::new(Some(3), Some(1));
        assert!(empty.indices(5).expect("slice").is_empty());
    }

    #[test]
    fn slice_indices_support_negative_steps() {
        let reversed = SliceSpec::default().with_step(-1);
        assert_eq!(reversed.indices(4).expect("slice"), vec![3, 2, 1, 0]);

        let every_other = SliceSpec::new(Some(4), Some(0)).with_step(-2);
        assert_eq!(every_other.indices(6).expect("slice"), vec![4, 2]);
    }

    #[test]
    fn slice_with_zero_step_is_rejected() {
        let err = SliceSpec::default()
            .with_step(0)
            .indices(3)
            .expect_err("zero step must fail");
        assert_eq!(err, TypeError::ZeroSliceStep);
        assert_eq!(err.to_string(), "slice step cannot be zero");
    }

    #[test]
    fn slice_display_uses_colon_notation() {
        assert_eq!(SliceSpec::new(Some(1), Some(3)).to_string(), "1:3");
        assert_eq!(SliceSpec::new(None, Some(-1)).to_string(), ":-1");
        assert_eq!(SliceSpec::default().with_step(-1).to_string(), "::-1");
    }

    #[test]
    fn integer_view_covers_bool_and_int() {
        assert_eq!(Value::Bool(false).as_int(), Some(0));
        assert_eq!(Value::Int(-4).as_int(), Some(-4));
        assert_eq!(Value::Float(2.0).as_int(), None);
    }

    #[test]
    fn floats_display_like_native_reprs() {
        for (value, text) in [
            (1.0, "1.0"),
            (0.1, "0.1"),
            (1.5e-7, "1.5e-07"),
            (0.0001, "0.0001"),
            (1e16, "1e+16"),
            (1e100, "1e+100"),
            (123456789012345.6, "123456789012345.6"),
            (-0.0, "-0.0"),
            (f64::INFINITY, "inf"),
            (f64::NEG_INFINITY, "-inf"),
            (f64::NAN, "nan"),
        ] {
            assert_eq!(Value::Float(value).to_string(), text);
        }
    }

    #[test]
    fn records_expose_fields_as_attributes() {
        let record = Record::new("Point").with_field("x", 3).with_field("y", 4);
        assert_eq!(record.type_name(), "Point");
        assert_eq!(record.get_attr("x"), Some(Value::Int(3)));
        assert_eq!(record.get_attr("z"), None);
        assert!(!record.has_method("x"));
    }

    #[test]
    fn object_equality_is_identity() {
        let shared: Arc<dyn Object> = Arc::new(Record::new("Thing"));
        let a = Value::Object(Arc::clone(&shared));
        let b = Value::Object(shared);
        let c = Record::new("Thing").into_value();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(c.kind(), ValueKind::Object);
        assert_eq!(c.type_name(), "Thing");
    }

    #[test]
    fn int_and_float_are_distinct_values() {
        assert!(!Value::Int(1).identical(&Value::Float(1.0)));
        assert!(Value::List(vec![1.into(), "a".into()]).identical(&Value::List(vec![
            Value::Int(1),
            Value::Str("a".to_owned())
        ])));
    }

    #[test]
    fn display_renders_literal_notation() {
        let mut entries = BTreeMap::new();
        entries.insert("key".to_owned(), Value::from("it's"));
        let value = Value::List(vec![
            Value::None,
            Value::Bool(true),
            Value::Int(7),
            Value::Float(1.0),
            Value::Map(entries),
        ]);
        assert_eq!(value.to_string(), "[None, True, 7, 1.0, {'key': 'it\\'s'}]");
        assert_eq!(
            Record::new("Point").into_value().to_string(),
            "<Point object>"
        );
    }

    #[test]
    fn values_serialize_with_kind_tags() {
        let value = Value::List(vec![Value::Int(1), Value::from("a"), Value::None]);
        let json = serde_json::to_string(&value).expect("serialize");
        assert_eq!(
            json,
            r#"{"kind":"list","value":[{"kind":"int","value":1},{"kind":"str","value":"a"},{"kind":"none"}]}"#
        );
        let back: Value = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, value);
    }

    #[test]
    fn objects_do_not_serialize() {
        let value = Record::new("Opaque").into_value();
        assert!(serde_json::to_string(&value).is_err());
    }
}
