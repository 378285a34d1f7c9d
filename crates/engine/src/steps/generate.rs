//! Row generator: a source step emitting literal rows from its configuration.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rowflow_common::{Result, RowflowError};
use rowflow_core::{Row, RowSchema, Value};

use crate::step::{Step, StepBuildContext, StepFactory, StepOutput};

/// Configuration of a `row_generator` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Schema of the generated rows.
    pub schema: RowSchema,
    /// Literal rows, one `Vec<Value>` per row.
    pub rows: Vec<Vec<Value>>,
    /// How many times the row list is replayed.
    #[serde(default = "default_repeat")]
    pub repeat: u64,
}

fn default_repeat() -> u64 {
    1
}

pub(crate) struct GeneratorStep {
    schema: Arc<RowSchema>,
    rows: Vec<Row>,
    repeat: u64,
}

#[async_trait]
impl Step for GeneratorStep {
    fn output_schema(&mut self, inputs: &[Arc<RowSchema>]) -> Result<Arc<RowSchema>> {
        if !inputs.is_empty() {
            return Err(RowflowError::InvalidConfig(
                "row generator takes no input".to_string(),
            ));
        }
        for row in &self.rows {
            self.schema.check_row(row)?;
        }
        Ok(Arc::clone(&self.schema))
    }

    async fn process_row(&mut self, _row: Row, _out: &mut StepOutput<'_>) -> Result<()> {
        Err(RowflowError::Execution(
            "row generator received an input row".to_string(),
        ))
    }

    async fn finish(&mut self, out: &mut StepOutput<'_>) -> Result<()> {
        for _ in 0..self.repeat {
            for row in &self.rows {
                out.push(row.clone()).await?;
            }
        }
        Ok(())
    }
}

/// Factory for `row_generator`.
pub(crate) struct GeneratorFactory;

impl StepFactory for GeneratorFactory {
    fn name(&self) -> &str {
        "row_generator"
    }

    fn build(&self, ctx: &StepBuildContext) -> Result<Box<dyn Step>> {
        let config: GeneratorConfig = serde_json::from_value(ctx.config.clone()).map_err(|e| {
            RowflowError::InvalidConfig(format!("stage '{}': bad generator config: {e}", ctx.stage))
        })?;
        Ok(Box::new(GeneratorStep {
            schema: Arc::new(config.schema),
            rows: config.rows.into_iter().map(Row::from).collect(),
            repeat: config.repeat,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::{ColumnMeta, ValueKind};

    fn build(config: GeneratorConfig) -> Box<dyn Step> {
        let ctx = StepBuildContext {
            pipeline: "t".into(),
            stage: "gen".into(),
            copy: 0,
            config: serde_json::to_value(config).expect("config"),
            engine: Default::default(),
            metrics: Default::default(),
        };
        GeneratorFactory.build(&ctx).expect("build")
    }

    #[test]
    fn declares_its_configured_schema() {
        let schema = RowSchema::new().with_column(ColumnMeta::new("id", ValueKind::Integer));
        let mut step = build(GeneratorConfig {
            schema: schema.clone(),
            rows: vec![vec![Value::Integer(1)]],
            repeat: 1,
        });
        let out = step.output_schema(&[]).expect("schema");
        assert_eq!(*out, schema);
    }

    #[test]
    fn rejects_rows_not_matching_the_schema() {
        let schema = RowSchema::new().with_column(ColumnMeta::new("id", ValueKind::Integer));
        let mut step = build(GeneratorConfig {
            schema,
            rows: vec![vec![Value::String("oops".into())]],
            repeat: 1,
        });
        assert!(step.output_schema(&[]).is_err());
    }

    #[test]
    fn rejects_upstream_wiring() {
        let schema = RowSchema::new().with_column(ColumnMeta::new("id", ValueKind::Integer));
        let mut step = build(GeneratorConfig {
            schema,
            rows: vec![],
            repeat: 1,
        });
        assert!(step.output_schema(&[Arc::new(RowSchema::new())]).is_err());
    }
}
