use thiserror::Error;

/// Canonical rowflow error taxonomy used across crates.
///
/// Classification guidance:
/// - [`RowflowError::InvalidConfig`]: pipeline/stage definition or environment contract violations
/// - [`RowflowError::Schema`]: row arity, column kind, or schema-binding violations
/// - [`RowflowError::Execution`]: runtime row transform, codec, or spill/merge failures
/// - [`RowflowError::Io`]: raw filesystem IO failures from std APIs
/// - [`RowflowError::Unsupported`]: syntactically valid but intentionally unimplemented behavior
#[derive(Debug, Error)]
pub enum RowflowError {
    /// Invalid or inconsistent pipeline/stage configuration.
    ///
    /// Examples:
    /// - edge referencing an unknown stage
    /// - unknown step type name
    /// - sort key naming a column absent from the input schema
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Row shape or schema contract violations.
    ///
    /// Examples:
    /// - row arity differing from the channel's bound schema
    /// - cell kind incompatible with its column descriptor
    /// - schema bound twice on the same channel
    #[error("schema error: {0}")]
    Schema(String),

    /// Runtime execution failures after wiring succeeded.
    ///
    /// Examples:
    /// - step transform failure for a row
    /// - spill run encode/decode failures
    /// - enqueue on a channel already marked done
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature not implemented in the current version.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard rowflow result alias.
pub type Result<T> = std::result::Result<T, RowflowError>;
