use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime value stored under a cache key.
///
/// Payloads are opaque to the cache except for [`Value::Int`], which the
/// increment/decrement operations interpret. Serialized to `MsgPack` when a
/// mutation crosses node boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    /// Absent/neutral payload.
    Null,
    /// Boolean payload.
    Bool(bool),
    /// Signed 64-bit integer. The only variant `incr`/`decr` operate on.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// String-keyed map of values. `BTreeMap` keeps serialization stable.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the integer payload, or `None` for any other variant.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the string payload, or `None` for any other variant.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Array(items) => write!(f, "<array:{}>", items.len()),
            Value::Map(entries) => write!(f, "<map:{}>", entries.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_int_only_matches_int() {
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Float(42.0).as_int(), None);
        assert_eq!(Value::String("42".to_string()).as_int(), None);
        assert_eq!(Value::Null.as_int(), None);
    }

    #[test]
    fn as_str_only_matches_string() {
        assert_eq!(Value::String("hi".to_string()).as_str(), Some("hi"));
        assert_eq!(Value::Int(1).as_str(), None);
    }

    #[test]
    fn from_conversions() {
        assert_eq!(Value::from(7_i64), Value::Int(7));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from("x"), Value::String("x".to_string()));
        assert_eq!(Value::from("x".to_string()), Value::String("x".to_string()));
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Bytes(vec![1, 2]).to_string(), "<2 bytes>");
        assert_eq!(
            Value::Array(vec![Value::Null, Value::Null]).to_string(),
            "<array:2>"
        );
    }

    #[test]
    fn nested_value_msgpack_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("count".to_string(), Value::Int(3));
        map.insert(
            "tags".to_string(),
            Value::Array(vec![Value::from("a"), Value::from("b")]),
        );
        map.insert("blob".to_string(), Value::Bytes(vec![0xDE, 0xAD]));

        let val = Value::Map(map);
        let bytes = rmp_serde::to_vec_named(&val).expect("serialize");
        let decoded: Value = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(val, decoded);
    }
}
