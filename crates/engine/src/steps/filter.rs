//! Filter rows: a single-column predicate with named true/false routing.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rowflow_common::{Result, RowflowError};
use rowflow_core::{Row, RowSchema, Value, compare_values};

use crate::step::{Step, StepBuildContext, StepFactory, StepOutput};

/// Predicate operator of a `filter_rows` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Cell equals the literal.
    Eq,
    /// Cell is strictly less than the literal.
    Lt,
    /// Cell is strictly greater than the literal.
    Gt,
    /// Cell is null.
    IsNull,
}

/// Configuration of a `filter_rows` stage.
///
/// Matching rows go to `send_true_to` when named, otherwise to every main
/// output. Non-matching rows go to `send_false_to` when named, otherwise they
/// are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Column the predicate reads.
    pub column: String,
    /// Predicate operator.
    pub op: FilterOp,
    /// Literal compared against; unused by `is_null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Downstream stage receiving matching rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_true_to: Option<String>,
    /// Downstream stage receiving non-matching rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_false_to: Option<String>,
}

pub(crate) struct FilterStep {
    config: FilterConfig,
    column: usize,
}

impl FilterStep {
    fn matches(&self, row: &Row) -> bool {
        let cell = row.get(self.column).unwrap_or(&Value::Null);
        match self.config.op {
            FilterOp::IsNull => cell.is_null(),
            FilterOp::Eq | FilterOp::Lt | FilterOp::Gt => {
                let literal = self.config.value.as_ref().unwrap_or(&Value::Null);
                // Null-vs-literal comparisons follow the engine's nulls-first
                // ordering policy, like the sort stage.
                let ord = compare_values(cell, literal);
                match self.config.op {
                    FilterOp::Eq => ord == Ordering::Equal,
                    FilterOp::Lt => ord == Ordering::Less,
                    FilterOp::Gt => ord == Ordering::Greater,
                    FilterOp::IsNull => unreachable!("handled above"),
                }
            }
        }
    }
}

#[async_trait]
impl Step for FilterStep {
    fn output_schema(&mut self, inputs: &[Arc<RowSchema>]) -> Result<Arc<RowSchema>> {
        let [input] = inputs else {
            return Err(RowflowError::InvalidConfig(
                "filter rows takes exactly one input".to_string(),
            ));
        };
        self.column = input.index_of(&self.config.column).ok_or_else(|| {
            RowflowError::InvalidConfig(format!(
                "filter rows: unknown column '{}'",
                self.config.column
            ))
        })?;
        Ok(Arc::clone(input))
    }

    async fn process_row(&mut self, row: Row, out: &mut StepOutput<'_>) -> Result<()> {
        if self.matches(&row) {
            match &self.config.send_true_to {
                Some(target) => out.push_to(target, row).await,
                None => out.push(row).await,
            }
        } else {
            match &self.config.send_false_to {
                Some(target) => out.push_to(target, row).await,
                None => Ok(()),
            }
        }
    }
}

/// Factory for `filter_rows`.
pub(crate) struct FilterFactory;

impl StepFactory for FilterFactory {
    fn name(&self) -> &str {
        "filter_rows"
    }

    fn build(&self, ctx: &StepBuildContext) -> Result<Box<dyn Step>> {
        let config: FilterConfig = serde_json::from_value(ctx.config.clone()).map_err(|e| {
            RowflowError::InvalidConfig(format!("stage '{}': bad filter config: {e}", ctx.stage))
        })?;
        if config.value.is_none() && config.op != FilterOp::IsNull {
            return Err(RowflowError::InvalidConfig(format!(
                "stage '{}': filter op {:?} needs a literal value",
                ctx.stage, config.op
            )));
        }
        Ok(Box::new(FilterStep { config, column: 0 }))
    }
}
