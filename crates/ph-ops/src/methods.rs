use ph_types::{CallError, Kwargs, Object, Value, ValueKind};

use crate::{OpError, values_equal};

/// Built-in methods of the native value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Upper,
    Lower,
    Capitalize,
    Strip,
    LStrip,
    RStrip,
    Split,
    Replace,
    StartsWith,
    EndsWith,
    Find,
    StrCount,
    Join,
    ListCopy,
    ListCount,
    ListIndex,
    MapGet,
    MapKeys,
    MapValues,
    MapItems,
    MapCopy,
    BitLength,
    IntConjugate,
    IsInteger,
    FloatConjugate,
}

impl Builtin {
    #[must_use]
    pub fn lookup(kind: ValueKind, name: &str) -> Option<Self> {
        let found = match (kind, name) {
            (ValueKind::Str, "upper") => Self::Upper,
            (ValueKind::Str, "lower") => Self::Lower,
            (ValueKind::Str, "capitalize") => Self::Capitalize,
            (ValueKind::Str, "strip") => Self::Strip,
            (ValueKind::Str, "lstrip") => Self::LStrip,
            (ValueKind::Str, "rstrip") => Self::RStrip,
            (ValueKind::Str, "split") => Self::Split,
            (ValueKind::Str, "replace") => Self::Replace,
            (ValueKind::Str, "startswith") => Self::StartsWith,
            (ValueKind::Str, "endswith") => Self::EndsWith,
            (ValueKind::Str, "find") => Self::Find,
            (ValueKind::Str, "count") => Self::StrCount,
            (ValueKind::Str, "join") => Self::Join,
            (ValueKind::List, "copy") => Self::ListCopy,
            (ValueKind::List, "count") => Self::ListCount,
            (ValueKind::List, "index") => Self::ListIndex,
            (ValueKind::Map, "get") => Self::MapGet,
            (ValueKind::Map, "keys") => Self::MapKeys,
            (ValueKind::Map, "values") => Self::MapValues,
            (ValueKind::Map, "items") => Self::MapItems,
            (ValueKind::Map, "copy") => Self::MapCopy,
            (ValueKind::Int | ValueKind::Bool, "bit_length") => Self::BitLength,
            (ValueKind::Int | ValueKind::Bool, "conjugate") => Self::IntConjugate,
            (ValueKind::Float, "is_integer") => Self::IsInteger,
            (ValueKind::Float, "conjugate") => Self::FloatConjugate,
            _ => return None,
        };
        Some(found)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Capitalize => "capitalize",
            Self::Strip => "strip",
            Self::LStrip => "lstrip",
            Self::RStrip => "rstrip",
            Self::Split => "split",
            Self::Replace => "replace",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Find => "find",
            Self::StrCount | Self::ListCount => "count",
            Self::Join => "join",
            Self::ListCopy | Self::MapCopy => "copy",
            Self::ListIndex => "index",
            Self::MapGet => "get",
            Self::MapKeys => "keys",
            Self::MapValues => "values",
            Self::MapItems => "items",
            Self::BitLength => "bit_length",
            Self::IntConjugate | Self::FloatConjugate => "conjugate",
            Self::IsInteger => "is_integer",
        }
    }

    pub fn call(self, receiver: &Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, CallError> {
        let method = self.name();
        match (self, receiver) {
            (Self::Upper, Value::Str(text)) => {
                bind(method, [], 0, args, kwargs)?;
                Ok(Value::Str(text.to_uppercase()))
            }
            (Self::Lower, Value::Str(text)) => {
                bind(method, [], 0, args, kwargs)?;
                Ok(Value::Str(text.to_lowercase()))
            }
            (Self::Capitalize, Value::Str(text)) => {
                bind(method, [], 0, args, kwargs)?;
                let mut chars = text.chars();
                let capitalized: String = match chars.next() {
                    Some(first) => first
                        .to_uppercase()
                        .chain(chars.as_str().to_lowercase().chars())
                        .collect(),
                    None => String::new(),
                };
                Ok(Value::Str(capitalized))
            }
            (Self::Strip | Self::LStrip | Self::RStrip, Value::Str(text)) => {
                let [chars] = bind(method, ["chars"], 0, args, kwargs)?;
                let chars = optional_str(method, "chars", chars)?;
                Ok(Value::Str(strip(self, text, chars).to_owned()))
            }
            (Self::Split, Value::Str(text)) => {
                let [sep, maxsplit] = bind(method, ["sep", "maxsplit"], 0, args, kwargs)?;
                let sep = optional_str(method, "sep", sep)?;
                let maxsplit = match present(maxsplit) {
                    Some(value) => int_arg(method, "maxsplit", value)?,
                    None => -1,
                };
                split(text, sep, maxsplit)
            }
            (Self::Replace, Value::Str(text)) => {
                let [old, new, count] = bind(method, ["old", "new", "count"], 2, args, kwargs)?;
                let old = str_arg(method, "old", old)?;
                let new = str_arg(method, "new", new)?;
                let replaced = match present(count) {
                    Some(value) => match usize::try_from(int_arg(method, "count", value)?) {
                        Ok(count) => text.replacen(old, new, count),
                        Err(_) => text.replace(old, new),
                    },
                    None => text.replace(old, new),
                };
                Ok(Value::Str(replaced))
            }
            (Self::StartsWith | Self::EndsWith, Value::Str(text)) => {
                let [affix] = bind(method, ["affix"], 1, args, kwargs)?;
                let affix = str_arg(method, "affix", affix)?;
                Ok(Value::Bool(if self == Self::StartsWith {
                    text.starts_with(affix)
                } else {
                    text.ends_with(affix)
                }))
            }
            (Self::Find, Value::Str(text)) => {
                let [sub] = bind(method, ["sub"], 1, args, kwargs)?;
                let sub = str_arg(method, "sub", sub)?;
                let position = text.find(sub).map_or(-1, |byte| {
                    i64::try_from(text[..byte].chars().count()).unwrap_or(i64::MAX)
                });
                Ok(Value::Int(position))
            }
            (Self::StrCount, Value::Str(text)) => {
                let [sub] = bind(method, ["sub"], 1, args, kwargs)?;
                let sub = str_arg(method, "sub", sub)?;
                Ok(count_value(text.matches(sub).count()))
            }
            (Self::Join, Value::Str(separator)) => {
                let [iterable] = bind(method, ["iterable"], 1, args, kwargs)?;
                join(separator, iterable)
            }
            (Self::ListCopy, Value::List(_)) | (Self::MapCopy, Value::Map(_)) => {
                bind(method, [], 0, args, kwargs)?;
                Ok(receiver.clone())
            }
            (Self::ListCount, Value::List(items)) => {
                let [needle] = bind(method, ["value"], 1, args, kwargs)?;
                let needle = needle.unwrap_or(&Value::None);
                Ok(count_value(
                    items.iter().filter(|item| values_equal(item, needle)).count(),
                ))
            }
            (Self::ListIndex, Value::List(items)) => {
                let [needle] = bind(method, ["value"], 1, args, kwargs)?;
                let needle = needle.unwrap_or(&Value::None);
                items
                    .iter()
                    .position(|item| values_equal(item, needle))
                    .map(count_value)
                    .ok_or_else(|| CallError::new(format!("{needle} is not in list")))
            }
            (Self::MapGet, Value::Map(entries)) => {
                let [key, default] = bind(method, ["key", "default"], 1, args, kwargs)?;
                let found = key
                    .and_then(Value::as_str)
                    .and_then(|key| entries.get(key));
                Ok(found.or(default).cloned().unwrap_or(Value::None))
            }
            (Self::MapKeys, Value::Map(entries)) => {
                bind(method, [], 0, args, kwargs)?;
                Ok(Value::List(
                    entries.keys().map(|key| Value::Str(key.clone())).collect(),
                ))
            }
            (Self::MapValues, Value::Map(entries)) => {
                bind(method, [], 0, args, kwargs)?;
                Ok(Value::List(entries.values().cloned().collect()))
            }
            (Self::MapItems, Value::Map(entries)) => {
                bind(method, [], 0, args, kwargs)?;
                Ok(Value::List(
                    entries
                        .iter()
                        .map(|(key, value)| {
                            Value::List(vec![Value::Str(key.clone()), value.clone()])
                        })
                        .collect(),
                ))
            }
            (Self::BitLength, Value::Bool(_) | Value::Int(_)) => {
                bind(method, [], 0, args, kwargs)?;
                let magnitude = receiver.as_int().unwrap_or_default().unsigned_abs();
                Ok(Value::Int(i64::from(u64::BITS - magnitude.leading_zeros())))
            }
            (Self::IntConjugate, Value::Bool(_) | Value::Int(_)) => {
                bind(method, [], 0, args, kwargs)?;
                Ok(receiver.as_int().map_or(Value::None, Value::Int))
            }
            (Self::IsInteger, Value::Float(v)) => {
                bind(method, [], 0, args, kwargs)?;
                Ok(Value::Bool(v.is_finite() && v.fract() == 0.0))
            }
            (Self::FloatConjugate, Value::Float(v)) => {
                bind(method, [], 0, args, kwargs)?;
                Ok(Value::Float(*v))
            }
            (_, other) => Err(CallError::new(format!(
                "method '{method}' does not apply to a '{}' object",
                other.type_name()
            ))),
        }
    }
}

/// A method resolved against a concrete receiver, ready to be invoked.
#[derive(Debug, Clone, Copy)]
pub enum Method<'a> {
    Builtin {
        receiver: &'a Value,
        builtin: Builtin,
    },
    Host {
        object: &'a dyn Object,
        name: &'a str,
    },
}

impl Method<'_> {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Builtin { builtin, .. } => builtin.name(),
            Self::Host { name, .. } => *name,
        }
    }

    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value, CallError> {
        match self {
            Self::Builtin { receiver, builtin } => builtin.call(receiver, args, kwargs),
            Self::Host { object, name } => object.call_method(name, args, kwargs),
        }
    }
}

/// Resolve `receiver.name` to something callable. Fails the same way a
/// missing attribute does.
pub fn resolve_method<'a>(receiver: &'a Value, name: &'a str) -> Result<Method<'a>, OpError> {
    let method = match receiver {
        Value::Object(object) if object.has_method(name) => Some(Method::Host {
            object: &**object,
            name,
        }),
        Value::Object(_) => None,
        other => Builtin::lookup(other.kind(), name)
            .map(|builtin| Method::Builtin { receiver, builtin }),
    };
    method.ok_or_else(|| OpError::AttributeNotFound {
        type_name: receiver.type_name().to_owned(),
        name: name.to_owned(),
    })
}

/// Match positional and keyword arguments onto the parameter list `names`.
/// The first `required` parameters must be supplied.
fn bind<'v, const N: usize>(
    method: &str,
    names: [&str; N],
    required: usize,
    args: &'v [Value],
    kwargs: &'v Kwargs,
) -> Result<[Option<&'v Value>; N], CallError> {
    if args.len() > N {
        return Err(CallError::new(format!(
            "{method}() takes at most {N} arguments ({} given)",
            args.len()
        )));
    }

    let mut bound: [Option<&'v Value>; N] = [None; N];
    for (slot, arg) in bound.iter_mut().zip(args) {
        *slot = Some(arg);
    }

    for (key, value) in kwargs {
        let Some(position) = names.iter().position(|name| *name == key.as_str()) else {
            return Err(CallError::new(format!(
                "'{key}' is an invalid keyword argument for {method}()"
            )));
        };
        if bound[position].is_some() {
            return Err(CallError::new(format!(
                "{method}() got multiple values for argument '{key}'"
            )));
        }
        bound[position] = Some(value);
    }

    if let Some(missing) = names
        .iter()
        .zip(&bound)
        .take(required)
        .find_map(|(name, value)| value.is_none().then_some(name))
    {
        return Err(CallError::new(format!(
            "{method}() missing required argument '{missing}'"
        )));
    }
    Ok(bound)
}

/// An argument that was supplied and is not `None`.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| !value.is_none())
}

fn str_arg<'v>(method: &str, name: &str, value: Option<&'v Value>) -> Result<&'v str, CallError> {
    let value = value.unwrap_or(&Value::None);
    value.as_str().ok_or_else(|| {
        CallError::new(format!(
            "{method}() argument '{name}' must be str, not {}",
            value.type_name()
        ))
    })
}

fn optional_str<'v>(
    method: &str,
    name: &str,
    value: Option<&'v Value>,
) -> Result<Option<&'v str>, CallError> {
    match present(value) {
        Some(value) => str_arg(method, name, Some(value)).map(Some),
        None => Ok(None),
    }
}

fn int_arg(method: &str, name: &str, value: &Value) -> Result<i64, CallError> {
    match value {
        Value::Bool(_) | Value::Int(_) => Ok(value.as_int().unwrap_or_default()),
        other => Err(CallError::new(format!(
            "{method}() argument '{name}' must be int, not {}",
            other.type_name()
        ))),
    }
}

fn count_value(count: usize) -> Value {
    Value::Int(i64::try_from(count).unwrap_or(i64::MAX))
}

fn strip<'t>(which: Builtin, text: &'t str, chars: Option<&str>) -> &'t str {
    let strip_char = |ch: char| match chars {
        Some(set) => set.contains(ch),
        None => ch.is_whitespace(),
    };
    match which {
        Builtin::LStrip => text.trim_start_matches(strip_char),
        Builtin::RStrip => text.trim_end_matches(strip_char),
        _ => text.trim_matches(strip_char),
    }
}

fn split(text: &str, sep: Option<&str>, maxsplit: i64) -> Result<Value, CallError> {
    let limit = usize::try_from(maxsplit).ok();
    let pieces: Vec<&str> = match (sep, limit) {
        (Some(""), _) => return Err(CallError::new("empty separator")),
        (Some(sep), Some(limit)) => text.splitn(limit.saturating_add(1), sep).collect(),
        (Some(sep), None) => text.split(sep).collect(),
        (None, None) => text.split_whitespace().collect(),
        (None, Some(limit)) => {
            let mut pieces = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() && pieces.len() < limit {
                match rest.find(char::is_whitespace) {
                    Some(end) => {
                        pieces.push(&rest[..end]);
                        rest = rest[end..].trim_start();
                    }
                    None => {
                        pieces.push(rest);
                        rest = "";
                    }
                }
            }
            if !rest.is_empty() {
                pieces.push(rest);
            }
            pieces
        }
    };
    Ok(Value::List(
        pieces.into_iter().map(|piece| Value::Str(piece.to_owned())).collect(),
    ))
}

fn join(separator: &str, iterable: Option<&Value>) -> Result<Value, CallError> {
    let items = match iterable {
        Some(Value::List(items)) => items,
        other => {
            return Err(CallError::new(format!(
                "can only join a list, not {}",
                other.unwrap_or(&Value::None).type_name()
            )));
        }
    };

    let mut parts = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match item.as_str() {
            Some(part) => parts.push(part),
            None => {
                return Err(CallError::new(format!(
                    "sequence item {idx}: expected str instance, {} found",
                    item.type_name()
                )));
            }
        }
    }
    Ok(Value::Str(parts.join(separator)))
}
