//! Collect rows: a sink step writing every row into a shared handle.
//!
//! Mostly used by tests and embedding callers that want a pipeline's final
//! output in memory. A factory instance carries the handle, so it is
//! registered per pipeline rather than globally.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use rowflow_common::{Result, RowflowError};
use rowflow_core::{Row, RowSchema};

use crate::step::{Step, StepBuildContext, StepFactory, StepOutput};

/// Shared handle to the rows a `CollectFactory`'s steps have collected.
#[derive(Debug, Clone, Default)]
pub struct CollectedRows {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl CollectedRows {
    /// Fresh, empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far.
    pub fn snapshot(&self) -> Vec<Row> {
        self.rows.lock().expect("collector sink poisoned").clone()
    }

    /// Number of rows collected so far.
    pub fn len(&self) -> usize {
        self.rows.lock().expect("collector sink poisoned").len()
    }

    /// True when nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, row: Row) {
        self.rows.lock().expect("collector sink poisoned").push(row);
    }
}

struct CollectStep {
    sink: CollectedRows,
}

#[async_trait]
impl Step for CollectStep {
    fn output_schema(&mut self, inputs: &[Arc<RowSchema>]) -> Result<Arc<RowSchema>> {
        let first = inputs.first().ok_or_else(|| {
            RowflowError::InvalidConfig("collect rows needs at least one input".to_string())
        })?;
        if !inputs.iter().all(|s| s == first) {
            return Err(RowflowError::InvalidConfig(
                "collect rows needs all inputs to share one row layout".to_string(),
            ));
        }
        Ok(Arc::clone(first))
    }

    async fn process_row(&mut self, row: Row, _out: &mut StepOutput<'_>) -> Result<()> {
        self.sink.push(row);
        Ok(())
    }
}

/// Factory for collecting sinks; every step built by one factory shares its
/// [`CollectedRows`] handle.
pub struct CollectFactory {
    name: String,
    sink: CollectedRows,
}

impl CollectFactory {
    /// Factory registered as step type `name`, collecting into `sink`.
    pub fn new(name: impl Into<String>, sink: CollectedRows) -> Self {
        Self {
            name: name.into(),
            sink,
        }
    }
}

impl StepFactory for CollectFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, _ctx: &StepBuildContext) -> Result<Box<dyn Step>> {
        Ok(Box::new(CollectStep {
            sink: self.sink.clone(),
        }))
    }
}
