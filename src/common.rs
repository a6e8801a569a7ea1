//! Typed key/value attributes shared by traces, metrics and resources.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The key part of attribute [`KeyValue`] pairs.
///
/// Keys with the same name but values of different types are distinct
/// attributes; equality of a [`KeyValue`] covers both halves.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Cow<'static, str>);

impl Key {
    /// Create a new `Key`.
    pub fn new(value: impl Into<Key>) -> Self {
        value.into()
    }

    /// Create a new const `Key`.
    pub const fn from_static_str(value: &'static str) -> Self {
        Key(Cow::Borrowed(value))
    }

    /// Returns a reference to the underlying key name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Key {
    fn from(key: &'static str) -> Self {
        Key(Cow::Borrowed(key))
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key(Cow::Owned(key))
    }
}

impl From<Cow<'static, str>> for Key {
    fn from(key: Cow<'static, str>) -> Self {
        Key(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0.into_owned()
    }
}

/// A string value of an attribute.
///
/// Cheap to clone; shared ownership is used for runtime-built strings so
/// attribute sets can be copied between spans, points and exporters without
/// reallocating. Comparison and hashing are by content, regardless of how
/// the string is owned.
#[derive(Clone, Debug)]
pub struct StringValue(ValueStr);

#[derive(Clone, Debug)]
enum ValueStr {
    Static(&'static str),
    Shared(Arc<str>),
}

impl PartialEq for StringValue {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for StringValue {}

impl PartialOrd for StringValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StringValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for StringValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl StringValue {
    /// Returns a string slice of this value.
    pub fn as_str(&self) -> &str {
        match &self.0 {
            ValueStr::Static(s) => s,
            ValueStr::Shared(s) => s,
        }
    }
}

impl From<&'static str> for StringValue {
    fn from(value: &'static str) -> Self {
        StringValue(ValueStr::Static(value))
    }
}

impl From<String> for StringValue {
    fn from(value: String) -> Self {
        StringValue(ValueStr::Shared(Arc::from(value)))
    }
}

impl From<Arc<str>> for StringValue {
    fn from(value: Arc<str>) -> Self {
        StringValue(ValueStr::Shared(value))
    }
}

impl From<Cow<'static, str>> for StringValue {
    fn from(value: Cow<'static, str>) -> Self {
        match value {
            Cow::Borrowed(s) => StringValue(ValueStr::Static(s)),
            Cow::Owned(s) => StringValue(ValueStr::Shared(Arc::from(s))),
        }
    }
}

impl From<StringValue> for String {
    fn from(value: StringValue) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for StringValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A homogeneous array of attribute values.
#[derive(Clone, Debug)]
pub enum Array {
    /// Array of bools
    Bool(Vec<bool>),
    /// Array of integers
    I64(Vec<i64>),
    /// Array of floats
    F64(Vec<f64>),
    /// Array of strings
    String(Vec<StringValue>),
}

impl fmt::Display for Array {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Array::Bool(values) => display_comma_separated(fmt, values),
            Array::I64(values) => display_comma_separated(fmt, values),
            Array::F64(values) => display_comma_separated(fmt, values),
            Array::String(values) => display_comma_separated(fmt, values),
        }
    }
}

fn display_comma_separated<T: fmt::Display>(
    fmt: &mut fmt::Formatter<'_>,
    values: &[T],
) -> fmt::Result {
    write!(fmt, "[")?;
    for (i, t) in values.iter().enumerate() {
        if i > 0 {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}", t)?;
    }
    write!(fmt, "]")
}

macro_rules! from_array {
    ($($t:ty, $val:expr);+$(;)?) => {
        $(
            impl From<$t> for Array {
                fn from(t: $t) -> Self {
                    $val(t)
                }
            }
        )+
    }
}

from_array!(
    Vec<bool>, Array::Bool;
    Vec<i64>, Array::I64;
    Vec<f64>, Array::F64;
    Vec<StringValue>, Array::String;
);

/// The value part of attribute [`KeyValue`] pairs.
#[derive(Clone, Debug)]
pub enum Value {
    /// bool values
    Bool(bool),
    /// i64 values
    I64(i64),
    /// f64 values
    F64(f64),
    /// String values
    String(StringValue),
    /// Array of homogeneous values
    Array(Array),
}

impl Value {
    /// String representation of the `Value`.
    ///
    /// This will allocate iff the underlying value is not a `String`.
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Value::Bool(v) => format!("{}", v).into(),
            Value::I64(v) => format!("{}", v).into(),
            Value::F64(v) => format!("{}", v).into(),
            Value::String(v) => Cow::Borrowed(v.as_str()),
            Value::Array(v) => format!("{}", v).into(),
        }
    }
}

macro_rules! from_values {
   ($( ($t:ty, $val:expr) );+$(;)?) => {
        $(
            impl From<$t> for Value {
                fn from(t: $t) -> Self {
                    $val(t)
                }
            }
        )+
    }
}

from_values!(
    (bool, Value::Bool);
    (i64, Value::I64);
    (f64, Value::F64);
    (StringValue, Value::String);
    (Array, Value::Array);
);

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I64(value.into())
    }
}

impl From<&'static str> for Value {
    fn from(value: &'static str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}

impl From<Cow<'static, str>> for Value {
    fn from(value: Cow<'static, str>) -> Self {
        Value::String(value.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => v.fmt(fmt),
            Value::I64(v) => v.fmt(fmt),
            Value::F64(v) => v.fmt(fmt),
            Value::String(v) => fmt.write_str(v.as_str()),
            Value::Array(v) => v.fmt(fmt),
        }
    }
}

// Equality and hashing treat `F64` bitwise so attribute sets can key hash
// maps; `NaN == NaN` under this relation, which is what a map key needs.
impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Array::Bool(a), Array::Bool(b)) => a == b,
            (Array::I64(a), Array::I64(b)) => a == b,
            (Array::F64(a), Array::F64(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Array::String(a), Array::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Array {}

impl Hash for Array {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Array::Bool(values) => values.hash(state),
            Array::I64(values) => values.hash(state),
            Array::F64(values) => {
                for value in values {
                    value.to_bits().hash(state);
                }
            }
            Array::String(values) => values.hash(state),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Bool(value) => value.hash(state),
            Value::I64(value) => value.hash(state),
            Value::F64(value) => value.to_bits().hash(state),
            Value::String(value) => value.hash(state),
            Value::Array(value) => value.hash(state),
        }
    }
}

/// A key-value pair describing an aspect of a span, metric point or resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyValue {
    /// The attribute name
    pub key: Key,
    /// The attribute value
    pub value: Value,
}

impl KeyValue {
    /// Create a new `KeyValue` pair.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_display() {
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(Value::from(42_i64).to_string(), "42");
        assert_eq!(Value::from("label").to_string(), "label");
        assert_eq!(
            Value::Array(Array::I64(vec![1, 2, 3])).to_string(),
            "[1,2,3]"
        );
    }

    #[test]
    fn same_name_different_type_is_distinct() {
        let as_string = KeyValue::new("status", "200");
        let as_int = KeyValue::new("status", 200_i64);
        assert_ne!(as_string, as_int);
        assert_eq!(as_string.key, as_int.key);
    }
}
