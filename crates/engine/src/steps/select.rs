//! Select values: project, reorder, and rename columns by name.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rowflow_common::{Result, RowflowError};
use rowflow_core::{ColumnMeta, Row, RowSchema};

use crate::step::{Step, StepBuildContext, StepFactory, StepOutput};

/// One selected column of a `select_values` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedColumn {
    /// Input column name.
    pub name: String,
    /// Output name, defaulting to the input name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
}

/// Configuration of a `select_values` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectConfig {
    /// Output columns, in order.
    pub columns: Vec<SelectedColumn>,
}

pub(crate) struct SelectStep {
    columns: Vec<SelectedColumn>,
    indices: Vec<usize>,
}

#[async_trait]
impl Step for SelectStep {
    fn output_schema(&mut self, inputs: &[Arc<RowSchema>]) -> Result<Arc<RowSchema>> {
        let [input] = inputs else {
            return Err(RowflowError::InvalidConfig(
                "select values takes exactly one input".to_string(),
            ));
        };
        let mut schema = RowSchema::new();
        self.indices.clear();
        for selected in &self.columns {
            let idx = input.index_of(&selected.name).ok_or_else(|| {
                RowflowError::InvalidConfig(format!(
                    "select values: unknown input column '{}'",
                    selected.name
                ))
            })?;
            self.indices.push(idx);
            let source = input.column(idx).expect("index from index_of");
            let mut column = ColumnMeta::new(
                selected.rename.clone().unwrap_or_else(|| selected.name.clone()),
                source.kind,
            );
            column.length = source.length;
            column.precision = source.precision;
            schema.push(column);
        }
        Ok(Arc::new(schema))
    }

    async fn process_row(&mut self, row: Row, out: &mut StepOutput<'_>) -> Result<()> {
        let values = row.into_values();
        let projected: Row = self
            .indices
            .iter()
            .map(|&i| values.get(i).cloned().unwrap_or(rowflow_core::Value::Null))
            .collect();
        out.push(projected).await
    }
}

/// Factory for `select_values`.
pub(crate) struct SelectFactory;

impl StepFactory for SelectFactory {
    fn name(&self) -> &str {
        "select_values"
    }

    fn build(&self, ctx: &StepBuildContext) -> Result<Box<dyn Step>> {
        let config: SelectConfig = serde_json::from_value(ctx.config.clone()).map_err(|e| {
            RowflowError::InvalidConfig(format!("stage '{}': bad select config: {e}", ctx.stage))
        })?;
        if config.columns.is_empty() {
            return Err(RowflowError::InvalidConfig(format!(
                "stage '{}': select values needs at least one column",
                ctx.stage
            )));
        }
        Ok(Box::new(SelectStep {
            columns: config.columns,
            indices: Vec::new(),
        }))
    }
}
