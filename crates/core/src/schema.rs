//! Row schemas: ordered, named, typed column descriptors.

use serde::{Deserialize, Serialize};

use rowflow_common::{Result, RowflowError};

use crate::row::Row;
use crate::value::ValueKind;

/// Descriptor of one schema column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name, unique within a schema.
    pub name: String,
    /// Logical type of the column's values.
    pub kind: ValueKind,
    /// Display length hint, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Numeric precision hint, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl ColumnMeta {
    /// Column with no length/precision hints.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            length: None,
            precision: None,
        }
    }

    /// Set the display length hint.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set the precision hint.
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Ordered, named list of typed column descriptors.
///
/// Computed once when a stage is wired, immutable afterward, shared by reference
/// (`Arc<RowSchema>`) with every consumer of that stage's output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowSchema {
    columns: Vec<ColumnMeta>,
}

impl RowSchema {
    /// Empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append.
    pub fn with_column(mut self, column: ColumnMeta) -> Self {
        self.columns.push(column);
        self
    }

    /// Append a column.
    pub fn push(&mut self, column: ColumnMeta) {
        self.columns.push(column);
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column descriptor at position `i`.
    pub fn column(&self, i: usize) -> Option<&ColumnMeta> {
        self.columns.get(i)
    }

    /// All column descriptors in order.
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Position of the column named `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Verify a row's arity and per-cell kind compatibility.
    ///
    /// A null cell is compatible with any column.
    pub fn check_row(&self, row: &Row) -> Result<()> {
        if row.arity() != self.len() {
            return Err(RowflowError::Schema(format!(
                "row arity {} does not match schema arity {}",
                row.arity(),
                self.len()
            )));
        }
        for (i, column) in self.columns.iter().enumerate() {
            let value = row.get(i).expect("arity checked above");
            if let Some(kind) = value.kind() {
                if kind != column.kind {
                    return Err(RowflowError::Schema(format!(
                        "column '{}' expects {} but row holds {}",
                        column.name, column.kind, kind
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn two_column_schema() -> RowSchema {
        RowSchema::new()
            .with_column(ColumnMeta::new("id", ValueKind::Integer))
            .with_column(ColumnMeta::new("name", ValueKind::String).with_length(40))
    }

    #[test]
    fn index_of_finds_columns_in_order() {
        let schema = two_column_schema();
        assert_eq!(schema.index_of("id"), Some(0));
        assert_eq!(schema.index_of("name"), Some(1));
        assert_eq!(schema.index_of("missing"), None);
    }

    #[test]
    fn check_row_accepts_typed_nulls() {
        let schema = two_column_schema();
        let row = Row::from(vec![Value::Integer(1), Value::Null]);
        schema.check_row(&row).expect("null is compatible");
    }

    #[test]
    fn check_row_rejects_arity_and_kind_mismatches() {
        let schema = two_column_schema();
        assert!(schema.check_row(&Row::from(vec![Value::Integer(1)])).is_err());
        let wrong_kind = Row::from(vec![Value::String("1".into()), Value::Null]);
        assert!(schema.check_row(&wrong_kind).is_err());
    }
}
