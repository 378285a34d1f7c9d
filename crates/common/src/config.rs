use serde::{Deserialize, Serialize};

/// Engine-wide defaults passed into pipeline preparation.
///
/// Per-stage configuration can override the sort-related knobs; channel capacity is
/// uniform across a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded capacity of every row channel, in rows.
    pub channel_capacity: usize,
    /// Default in-memory batch size for the sort stage before spilling.
    pub sort_batch_rows: usize,
    /// Directory for sort spill-run files.
    pub spill_dir: String,
    /// Gzip-compress spill runs.
    pub compress_spill: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
            sort_batch_rows: 5000,
            spill_dir: ".rowflow_spill".to_string(),
            compress_spill: true,
        }
    }
}
