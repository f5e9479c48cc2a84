//! The dynamically typed value model.
//!
//! [`Value`] is a closed tagged union. Every variant answers its [`Kind`],
//! a JSON rendering, and a string rendering; coercion between kinds lives in
//! [`coerce`] as a free function table rather than as inherent methods, so
//! adding a coercion pair never touches this file.

pub mod coerce;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use coerce::{equal, is_nil};

/// The kind tag of a [`Value`], independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Nil,
    Error,
    Bool,
    Int,
    Number,
    String,
    Strings,
    Time,
    MapInt,
    MapString,
    MapValue,
    Slice,
    Struct,
}

/// A dynamically typed scalar or collection value.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Error(String),
    Bool(bool),
    Int(i64),
    Number(f64),
    String(Arc<str>),
    Strings(Vec<String>),
    Time(DateTime<Utc>),
    MapInt(BTreeMap<String, i64>),
    MapString(BTreeMap<String, String>),
    MapValue(BTreeMap<String, Value>),
    Slice(Vec<Value>),
    /// An opaque bag of named values; used for struct-shaped function results.
    Struct(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Nil => Kind::Nil,
            Value::Error(_) => Kind::Error,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Strings(_) => Kind::Strings,
            Value::Time(_) => Kind::Time,
            Value::MapInt(_) => Kind::MapInt,
            Value::MapString(_) => Kind::MapString,
            Value::MapValue(_) => Kind::MapValue,
            Value::Slice(_) => Kind::Slice,
            Value::Struct(_) => Kind::Struct,
        }
    }

    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::String(s.into())
    }

    /// A JSON rendering suitable for wire responses and debugging.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Nil => J::Null,
            Value::Error(msg) => serde_json::json!({ "error": msg }),
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::Number((*i).into()),
            Value::Number(n) => serde_json::Number::from_f64(*n).map(J::Number).unwrap_or(J::Null),
            Value::String(s) => J::String(s.to_string()),
            Value::Strings(v) => J::Array(v.iter().map(|s| J::String(s.clone())).collect()),
            Value::Time(t) => J::String(t.to_rfc3339()),
            Value::MapInt(m) => serde_json::to_value(m).unwrap_or(J::Null),
            Value::MapString(m) => serde_json::to_value(m).unwrap_or(J::Null),
            Value::MapValue(m) => J::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Value::Slice(v) => J::Array(v.iter().map(Value::to_json).collect()),
            Value::Struct(m) => J::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, ""),
            Value::Error(msg) => write!(f, "{msg}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Strings(v) => write!(f, "{}", v.join(",")),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Value::MapInt(_) | Value::MapString(_) | Value::MapValue(_) | Value::Struct(_) => {
                write!(f, "{}", self.to_json())
            }
            Value::Slice(v) => {
                if v.len() == 1 {
                    write!(f, "{}", v[0])
                } else {
                    write!(f, "{}", self.to_json())
                }
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equal(self, other)
    }
}
