// MIT License - Copyright (c) 2026 Peter Wright
// Decoded field values

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::FrameError;

/// Named fields of a decoded structure, or a patch applied to a stored object.
pub type Record = BTreeMap<String, Value>;

/// A decoded value. Grammars produce these on parse and consume them on build.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// A timestamp; `None` when the panel reports no date.
    Time(Option<NaiveDateTime>),
    List(Vec<Value>),
    Record(Record),
    /// Entries keyed by the panel's 1-based logical index.
    Map(BTreeMap<u32, Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<u32, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// The value encoders use for a missing entry of this shape.
    pub fn zero_like(&self) -> Value {
        match self {
            Value::Bool(_) => Value::Bool(false),
            Value::Int(_) => Value::Int(0),
            Value::Float(_) => Value::Float(0.0),
            Value::Text(_) => Value::Text(String::new()),
            Value::Bytes(b) => Value::Bytes(vec![0; b.len()]),
            Value::Time(_) => Value::Time(None),
            Value::List(l) => Value::List(l.iter().map(Value::zero_like).collect()),
            Value::Record(r) => {
                Value::Record(r.iter().map(|(k, v)| (k.clone(), v.zero_like())).collect())
            }
            Value::Map(_) => Value::Map(BTreeMap::new()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&hex::encode(b)),
            Value::Time(Some(t)) => write!(f, "{t}"),
            Value::Time(None) => f.write_str("-"),
            other => match serde_json::to_string(other) {
                Ok(json) => f.write_str(&json),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(u64::from(v))
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(u64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<BTreeMap<u32, Value>> for Value {
    fn from(m: BTreeMap<u32, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<Option<NaiveDateTime>> for Value {
    fn from(t: Option<NaiveDateTime>) -> Self {
        Value::Time(t)
    }
}

/// Typed lookups into a decoded record.
pub trait RecordExt {
    fn field(&self, name: &str) -> Result<&Value, FrameError>;

    fn int(&self, name: &str) -> Result<u64, FrameError> {
        let value = self.field(name)?;
        value.as_u64().ok_or_else(|| mismatch(name, "integer", value))
    }

    fn u8(&self, name: &str) -> Result<u8, FrameError> {
        let v = self.int(name)?;
        u8::try_from(v).map_err(|_| FrameError::InvalidValue {
            field: name.to_string(),
            details: format!("{v} does not fit in a byte"),
        })
    }

    fn flag(&self, name: &str) -> bool;

    fn bytes(&self, name: &str) -> Result<&[u8], FrameError> {
        let value = self.field(name)?;
        value.as_bytes().ok_or_else(|| mismatch(name, "bytes", value))
    }

    fn record(&self, name: &str) -> Result<&Record, FrameError> {
        let value = self.field(name)?;
        value.as_record().ok_or_else(|| mismatch(name, "record", value))
    }

    fn map(&self, name: &str) -> Result<&BTreeMap<u32, Value>, FrameError> {
        let value = self.field(name)?;
        value.as_map().ok_or_else(|| mismatch(name, "map", value))
    }
}

impl RecordExt for Record {
    fn field(&self, name: &str) -> Result<&Value, FrameError> {
        self.get(name)
            .ok_or_else(|| FrameError::MissingField(name.to_string()))
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

fn mismatch(name: &str, expected: &str, got: &Value) -> FrameError {
    FrameError::InvalidValue {
        field: name.to_string(),
        details: format!("expected {expected}, got {got}"),
    }
}

/// Build a record from `(name, value)` pairs.
pub fn record<I, K, V>(fields: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
