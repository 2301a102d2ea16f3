use serde::{Deserialize, Serialize};
use std::fmt;

/// A stored value: an opaque byte string or a 64-bit counter.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// Integer maintained by increments.
    Integer(i64),
}

impl Value {
    /// Payload size as accounted in statistics.
    pub fn size(&self) -> i64 {
        match self {
            Value::Bytes(b) => b.len() as i64,
            Value::Integer(_) => 8,
        }
    }

    /// The integer payload, if this is a counter.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Bytes(_) => None,
        }
    }

    /// The byte payload, if this is not a counter.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Integer(_) => None,
        }
    }

    /// Combines `other` into `self`: byte strings concatenate, integers add.
    /// Returns false when the kinds differ and nothing was changed.
    pub fn merge(&mut self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bytes(a), Value::Bytes(b)) => {
                a.extend_from_slice(b);
                true
            }
            (Value::Integer(a), Value::Integer(b)) => {
                *a = a.wrapping_add(*b);
                true
            }
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(b) => write!(f, "\"{}\"", b.escape_ascii()),
            Value::Integer(i) => write!(f, "{i}"),
        }
    }
}
