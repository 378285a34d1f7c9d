#![deny(missing_docs)]

//! Row-level primitives shared by the rowflow engine.
//!
//! Architecture role:
//! - cell value model with typed nulls
//! - ordered/named/typed row schemas
//! - multi-key row comparison with an explicit null and kind ordering policy
//! - binary row codec used by sort spill files
//!
//! Key modules:
//! - [`value`]
//! - [`schema`]
//! - [`row`]
//! - [`compare`]
//! - [`codec`]

pub mod codec;
pub mod compare;
pub mod row;
pub mod schema;
pub mod value;

pub use compare::{RowComparator, SortKey, compare_values};
pub use row::Row;
pub use schema::{ColumnMeta, RowSchema};
pub use value::{Value, ValueKind};
