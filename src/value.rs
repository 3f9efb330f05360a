//! Dynamic values carried by action inputs, outputs and frame bindings.
//!
//! Concepts exchange plain records: ordered maps from field name to
//! [`Value`]. The JSON form is the untagged one, so records read and write as
//! ordinary JSON objects at the transport boundary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A record of named fields. Ordered so iteration and serialization are
/// deterministic.
pub type Record = BTreeMap<String, Value>;

/// A dynamically typed value.
///
/// # Examples
///
/// ```
/// use conceptsync::Value;
///
/// let name = Value::from("alice");
/// let count = Value::from(3);
///
/// assert_eq!(name.as_str(), Some("alice"));
/// assert_eq!(count.as_int(), Some(3));
/// assert!(Value::Null.is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent or explicit null.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A string.
    String(String),
    /// An ordered list.
    List(Vec<Value>),
    /// Nested record.
    Record(Record),
}

impl Value {
    /// Whether this is `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The boolean, if this is one.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The integer, if this is one.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// The list items, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// The nested record, if this is one.
    pub const fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a field of a record value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_record().and_then(|r| r.get(name))
    }

    /// Follows a path of field names through nested records.
    #[must_use]
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        path.iter().try_fold(self, |v, seg| v.field(seg.as_ref()))
    }

    /// Builds a record value from field/value pairs.
    pub fn record<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Record(_) => "record",
        }
    }

    /// Converts to a `serde_json::Value`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Self::Null => J::Null,
            Self::Bool(v) => J::Bool(*v),
            Self::Int(v) => J::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v).map_or(J::Null, J::Number),
            Self::String(v) => J::String(v.clone()),
            Self::List(v) => J::Array(v.iter().map(Self::to_json).collect()),
            Self::Record(v) => J::Object(v.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::List(_) | Self::Record(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Self::Record(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => Self::Null,
            J::Bool(b) => Self::Bool(b),
            J::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            J::String(s) => Self::String(s),
            J::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            J::Object(map) => Self::Record(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

/// Converts a record into a JSON object.
#[must_use]
pub fn record_to_json(record: &Record) -> serde_json::Value {
    serde_json::Value::Object(record.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(42).as_int(), Some(42));
        assert_eq!(Value::from(42).as_float(), Some(42.0));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert!(Value::from("hi").as_int().is_none());
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
    }

    #[test]
    fn test_value_lookup_nested_record() {
        let doc = Value::record([
            ("owner", Value::from("alice")),
            ("meta", Value::record([("source", "app")])),
        ]);
        assert_eq!(doc.field("owner"), Some(&Value::from("alice")));
        assert_eq!(doc.lookup(&["meta", "source"]), Some(&Value::from("app")));
        assert_eq!(doc.lookup(&["meta", "missing"]), None);
        assert_eq!(Value::from(1).field("owner"), None);
    }

    #[test]
    fn test_value_json_round_trip_is_untagged() {
        let json = serde_json::json!({"owner": "alice", "items": [1, 2.5, null], "ok": true});
        let value = Value::from(json.clone());
        assert_eq!(value.field("items"), Some(&Value::List(vec![
            Value::Int(1),
            Value::Float(2.5),
            Value::Null
        ])));
        assert_eq!(value.to_json(), json);

        let parsed: Value = serde_json::from_str(r#"{"meal":"m1"}"#).unwrap();
        assert_eq!(parsed, Value::record([("meal", "m1")]));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::from("m1").to_string(), "\"m1\"");
        assert_eq!(Value::List(vec![Value::from(1)]).to_string(), "[1]");
    }

    #[test]
    fn test_value_type_name() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::List(Vec::new()).type_name(), "list");
        assert_eq!(Value::Record(Record::new()).type_name(), "record");
    }
}
