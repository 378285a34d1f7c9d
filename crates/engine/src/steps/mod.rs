//! Built-in step types.
//!
//! The engine ships only the steps its own surfaces need: a row source, a
//! column mapper, a conditionally-routing filter, a collecting sink, and the
//! external sort. Everything else plugs in through the step registry.

pub mod collect;
pub mod filter;
pub mod generate;
pub mod select;
pub mod sort;
pub(crate) mod spill;

use std::sync::Arc;

use crate::step::StepRegistry;

pub use collect::{CollectFactory, CollectedRows};
pub use generate::GeneratorConfig;
pub use sort::{SortConfig, SortKeySpec};

/// Register every built-in step type.
pub fn register_builtin_steps(registry: &StepRegistry) {
    registry.register(Arc::new(generate::GeneratorFactory));
    registry.register(Arc::new(select::SelectFactory));
    registry.register(Arc::new(filter::FilterFactory));
    registry.register(Arc::new(sort::SortFactory));
}
