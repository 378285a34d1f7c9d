//! Fixed-arity row of cells conforming to a [`crate::schema::RowSchema`].

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A fixed-length ordered tuple of cells conforming to a [`RowSchema`].
///
/// Rows are owned by whichever channel currently holds them; dequeue transfers
/// ownership. `Clone` exists only for broadcast fan-out to multiple consumers.
///
/// [`RowSchema`]: crate::schema::RowSchema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row(Vec<Value>);

impl Row {
    /// Empty row, extended with [`Row::push`].
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Number of cells.
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Cell at position `i`.
    pub fn get(&self, i: usize) -> Option<&Value> {
        self.0.get(i)
    }

    /// All cells in order.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Append a cell.
    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    /// Consume into the underlying cells.
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl Default for Row {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
