//! Shared configuration, error types, and metrics for rowflow crates.
//!
//! Architecture role:
//! - defines engine configuration passed across layers
//! - provides common [`RowflowError`] / [`Result`] contracts
//! - hosts per-stage execution metrics
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod metrics;

pub use config::EngineConfig;
pub use error::{Result, RowflowError};
pub use metrics::{MetricsRegistry, global_metrics};
