//! Multi-column row comparison for sorting.
//!
//! Ordering policy (deterministic and total, used identically by the sort stage's
//! in-memory and merge phases):
//! - null sorts before every non-null value (nulls first under ascending keys);
//! - same-kind values compare naturally, numbers via `f64::total_cmp`,
//!   binary lexicographically;
//! - integer and number cells compare numerically with each other;
//! - any other kind mismatch orders by a fixed kind rank, so mixed data still
//!   yields one consistent order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::row::Row;
use crate::value::{Value, ValueKind};

/// One sort key: a column position and a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Column position in the input schema.
    pub column: usize,
    /// Ascending when true, descending otherwise.
    pub ascending: bool,
}

impl SortKey {
    /// Ascending key on `column`.
    pub fn asc(column: usize) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    /// Descending key on `column`.
    pub fn desc(column: usize) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

/// Compares rows on an ordered list of keys, left-to-right, stopping at the
/// first non-equal key.
#[derive(Debug, Clone)]
pub struct RowComparator {
    keys: Vec<SortKey>,
}

impl RowComparator {
    /// Comparator over `keys`, applied left-to-right.
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    /// Configured keys.
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Compare two rows under the configured keys.
    ///
    /// Rows whose keyed cells are all equal compare as `Equal`; callers needing a
    /// stable tie-break (the sort stage) supply it outside the comparator.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for key in &self.keys {
            let left = a.get(key.column).unwrap_or(&Value::Null);
            let right = b.get(key.column).unwrap_or(&Value::Null);
            let ord = compare_values(left, right);
            if ord != Ordering::Equal {
                return if key.ascending { ord } else { ord.reverse() };
            }
        }
        Ordering::Equal
    }
}

/// Total order over cell values per the module policy.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
        (Value::Integer(x), Value::Number(y)) => (*x as f64).total_cmp(y),
        (Value::Number(x), Value::Integer(y)) => x.total_cmp(&(*y as f64)),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Binary(x), Value::Binary(y)) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn kind_rank(v: &Value) -> u8 {
    match v.kind() {
        None => 0,
        Some(ValueKind::String) => 1,
        Some(ValueKind::Integer) => 2,
        Some(ValueKind::Number) => 3,
        Some(ValueKind::Boolean) => 4,
        Some(ValueKind::Date) => 5,
        Some(ValueKind::Binary) => 6,
    }
}
