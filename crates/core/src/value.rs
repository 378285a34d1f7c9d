//! Cell value model for rows.
//!
//! A row cell is a [`Value`]; its logical type is a [`ValueKind`] carried by the
//! schema column. A null cell is `Value::Null` and is interpreted against the
//! column's kind (typed-null semantics).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical type of a schema column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit floating point number.
    Number,
    /// Boolean value.
    Boolean,
    /// Date/time, second-of-day precision or better.
    Date,
    /// Raw bytes.
    Binary,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Date => "date",
            ValueKind::Binary => "binary",
        };
        write!(f, "{s}")
    }
}

/// One cell of a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// UTF-8 string.
    String(String),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point number.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
    /// Date/time without timezone.
    Date(NaiveDateTime),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Typed null; the column descriptor supplies the logical type.
    Null,
}

impl Value {
    /// Kind of a non-null value, `None` for null.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::String(_) => Some(ValueKind::String),
            Value::Integer(_) => Some(ValueKind::Integer),
            Value::Number(_) => Some(ValueKind::Number),
            Value::Boolean(_) => Some(ValueKind::Boolean),
            Value::Date(_) => Some(ValueKind::Date),
            Value::Binary(_) => Some(ValueKind::Binary),
            Value::Null => None,
        }
    }

    /// True for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Value::Null => write!(f, "<null>"),
        }
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

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_has_no_kind() {
        assert_eq!(Value::Null.kind(), None);
        assert!(Value::Null.is_null());
        assert_eq!(Value::Integer(3).kind(), Some(ValueKind::Integer));
    }

    #[test]
    fn serde_round_trips_kinds() {
        let json = serde_json::to_string(&ValueKind::Integer).expect("encode");
        assert_eq!(json, "\"integer\"");
        let back: ValueKind = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, ValueKind::Integer);
    }
}
