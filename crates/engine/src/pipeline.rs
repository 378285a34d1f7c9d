//! Pipeline wiring and lifecycle: prepare, run, wait for completion.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use rowflow_common::{EngineConfig, MetricsRegistry, Result, RowflowError};
use rowflow_core::{ColumnMeta, RowSchema, ValueKind};

use crate::channel::{ChannelId, RowConsumer, RowProducer, row_channel};
use crate::graph::PipelineSpec;
use crate::step::{OutputTarget, Step, StepBuildContext, StepRegistry};
use crate::worker::{InputPolicy, StageReport, StageStatus, StageWorker};

/// Terminal status of a whole pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Every stage finished cleanly.
    Done,
    /// Halted by external cancellation.
    Stopped,
    /// At least one stage failed.
    Errored {
        /// The failed stage's name.
        stage: String,
        /// Root cause of the failure.
        cause: String,
    },
}

/// Outcome of a pipeline run: terminal status plus per-stage-copy reports.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Pipeline name.
    pub pipeline: String,
    /// Terminal status.
    pub status: PipelineStatus,
    /// One report per stage copy, in definition order.
    pub stages: Vec<StageReport>,
}

/// External cancellation handle for a running pipeline.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask every worker to halt at its next channel operation.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// A prepared execution graph: workers wired through schema-bound channels,
/// ready to run once.
pub struct Pipeline {
    name: String,
    workers: Vec<StageWorker>,
    stage_order: HashMap<String, usize>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl Pipeline {
    /// Wire the execution graph from a pipeline definition.
    ///
    /// Validates the graph, builds one step instance per stage copy through the
    /// registry, computes every stage's output schema once in topological
    /// order, then creates and schema-binds all channels.
    pub fn prepare(
        spec: &PipelineSpec,
        registry: &StepRegistry,
        config: &EngineConfig,
        metrics: MetricsRegistry,
    ) -> Result<Pipeline> {
        spec.validate()?;
        let n = spec.stages.len();
        let topo = spec.topo_order()?;

        // One step instance per stage copy.
        let mut steps: Vec<Vec<Box<dyn Step>>> = Vec::with_capacity(n);
        for stage in &spec.stages {
            let factory = registry.get(&stage.step_type).ok_or_else(|| {
                RowflowError::InvalidConfig(format!(
                    "stage '{}' uses unknown step type '{}'",
                    stage.name, stage.step_type
                ))
            })?;
            let mut copies = Vec::with_capacity(stage.copies as usize);
            for copy in 0..stage.copies {
                let ctx = StepBuildContext {
                    pipeline: spec.name.clone(),
                    stage: stage.name.clone(),
                    copy,
                    config: stage.config.clone(),
                    engine: config.clone(),
                    metrics: metrics.clone(),
                };
                copies.push(factory.build(&ctx)?);
            }
            steps.push(copies);
        }

        // Output and error schemas, computed once per stage in topological
        // order and shared by reference from then on.
        let mut out_schemas: Vec<Option<Arc<RowSchema>>> = vec![None; n];
        let mut err_schemas: Vec<Option<Arc<RowSchema>>> = vec![None; n];
        for &i in &topo {
            let stage = &spec.stages[i];
            let mut input_schemas = Vec::new();
            for up in spec.upstream_of(&stage.name) {
                let schema = out_schemas[up].clone().ok_or_else(|| {
                    RowflowError::Schema(format!(
                        "stage '{}' wired before its input '{}'",
                        stage.name, spec.stages[up].name
                    ))
                })?;
                input_schemas.push(schema);
            }
            for (j, other) in spec.stages.iter().enumerate() {
                if other.error_to.as_deref() == Some(stage.name.as_str()) {
                    let schema = err_schemas[j].clone().ok_or_else(|| {
                        RowflowError::Schema(format!(
                            "stage '{}' wired before error source '{}'",
                            stage.name, other.name
                        ))
                    })?;
                    input_schemas.push(schema);
                }
            }

            let mut schema = None;
            for step in steps[i].iter_mut() {
                let s = step.output_schema(&input_schemas)?;
                schema.get_or_insert(s);
            }
            let schema = schema.ok_or_else(|| {
                RowflowError::InvalidConfig(format!("stage '{}' has zero copies", stage.name))
            })?;
            out_schemas[i] = Some(Arc::clone(&schema));

            if stage.error_to.is_some() {
                let first = input_schemas.first().cloned().ok_or_else(|| {
                    RowflowError::InvalidConfig(format!(
                        "source stage '{}' cannot route errors",
                        stage.name
                    ))
                })?;
                if !input_schemas.iter().all(|s| *s == first) {
                    return Err(RowflowError::InvalidConfig(format!(
                        "stage '{}' needs one input row layout to route errors",
                        stage.name
                    )));
                }
                err_schemas[i] = Some(Arc::new(error_schema(&first)));
            }
        }

        // Channels: one per producer-copy/consumer-copy pair, schema-bound at
        // creation. Outputs are grouped per downstream stage so a step can
        // broadcast or route by stage name.
        let mut outputs: Vec<Vec<Vec<OutputTarget>>> = spec
            .stages
            .iter()
            .map(|s| (0..s.copies).map(|_| Vec::new()).collect())
            .collect();
        let mut inputs: Vec<Vec<Vec<RowConsumer>>> = spec
            .stages
            .iter()
            .map(|s| (0..s.copies).map(|_| Vec::new()).collect())
            .collect();
        let mut error_outputs: Vec<Vec<Vec<RowProducer>>> = spec
            .stages
            .iter()
            .map(|s| (0..s.copies).map(|_| Vec::new()).collect())
            .collect();

        for edge in &spec.edges {
            let from = spec.stage_index(&edge.from).expect("validated edge");
            let to = spec.stage_index(&edge.to).expect("validated edge");
            let schema = out_schemas[from].clone().expect("schema computed above");
            for fc in 0..spec.stages[from].copies {
                for tc in 0..spec.stages[to].copies {
                    let id = ChannelId::new(&edge.from, fc, &edge.to, tc);
                    let (producer, consumer) = row_channel(id, config.channel_capacity);
                    producer.bind_schema(Arc::clone(&schema))?;
                    push_to_target(&mut outputs[from][fc as usize], &edge.to, producer);
                    inputs[to][tc as usize].push(consumer);
                }
            }
        }
        for (i, stage) in spec.stages.iter().enumerate() {
            let Some(target) = &stage.error_to else {
                continue;
            };
            let to = spec.stage_index(target).expect("validated error target");
            let schema = err_schemas[i].clone().expect("error schema computed above");
            for fc in 0..stage.copies {
                for tc in 0..spec.stages[to].copies {
                    let id = ChannelId::new(&stage.name, fc, target, tc);
                    let (producer, consumer) = row_channel(id, config.channel_capacity);
                    producer.bind_schema(Arc::clone(&schema))?;
                    error_outputs[i][fc as usize].push(producer);
                    inputs[to][tc as usize].push(consumer);
                }
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);

        let mut workers = Vec::new();
        let steps_by_stage = steps.into_iter();
        for ((i, stage), stage_steps) in spec.stages.iter().enumerate().zip(steps_by_stage) {
            let mut stage_outputs = std::mem::take(&mut outputs[i]).into_iter();
            let mut stage_inputs = std::mem::take(&mut inputs[i]).into_iter();
            let mut stage_errors = std::mem::take(&mut error_outputs[i]).into_iter();
            for (copy, step) in stage_steps.into_iter().enumerate() {
                let mut worker_inputs = stage_inputs.next().unwrap_or_default();
                let policy = match &stage.drain_first {
                    None => InputPolicy::RoundRobin,
                    Some(first) => {
                        // Channels from the drained stage move to the front,
                        // keeping their relative order.
                        let mut drained: Vec<RowConsumer> = Vec::new();
                        let mut rest: Vec<RowConsumer> = Vec::new();
                        for consumer in worker_inputs {
                            if consumer.id().origin_stage == *first {
                                drained.push(consumer);
                            } else {
                                rest.push(consumer);
                            }
                        }
                        let count = drained.len();
                        drained.extend(rest);
                        worker_inputs = drained;
                        InputPolicy::DrainFirst { count }
                    }
                };
                workers.push(StageWorker::new(
                    spec.name.clone(),
                    stage.name.clone(),
                    copy as u16,
                    step,
                    worker_inputs,
                    policy,
                    stage_outputs.next().unwrap_or_default(),
                    stage_errors.next().unwrap_or_default(),
                    stop_rx.clone(),
                    metrics.clone(),
                ));
            }
        }

        debug!(pipeline = %spec.name, workers = workers.len(), "pipeline prepared");
        Ok(Pipeline {
            name: spec.name.clone(),
            workers,
            stage_order: spec
                .stages
                .iter()
                .enumerate()
                .map(|(i, s)| (s.name.clone(), i))
                .collect(),
            stop_tx,
        })
    }

    /// Handle for external cancellation; safe to use from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Start every worker and block until all reach a terminal state.
    ///
    /// The first stage failure flips the stop signal so every other worker
    /// halts at its next channel operation; the report then carries the
    /// offending stage and root cause.
    pub async fn run(self) -> PipelineReport {
        info!(pipeline = %self.name, "pipeline starting");
        let mut set = JoinSet::new();
        for worker in self.workers {
            set.spawn(worker.run());
        }

        let mut reports: Vec<StageReport> = Vec::new();
        let mut join_failure: Option<String> = None;
        while let Some(res) = set.join_next().await {
            match res {
                Ok(report) => {
                    if report.status == StageStatus::Errored {
                        let _ = self.stop_tx.send(true);
                    }
                    reports.push(report);
                }
                Err(e) => {
                    error!(pipeline = %self.name, error = %e, "stage task failed to join");
                    let _ = self.stop_tx.send(true);
                    join_failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        reports.sort_by_key(|r| {
            (
                self.stage_order.get(&r.stage).copied().unwrap_or(usize::MAX),
                r.copy,
            )
        });

        let status = if let Some(failed) = reports.iter().find(|r| r.status == StageStatus::Errored)
        {
            PipelineStatus::Errored {
                stage: failed.stage.clone(),
                cause: failed
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown cause".to_string()),
            }
        } else if let Some(cause) = join_failure {
            PipelineStatus::Errored {
                stage: "<join>".to_string(),
                cause,
            }
        } else if reports.iter().any(|r| r.status == StageStatus::Stopped) {
            PipelineStatus::Stopped
        } else {
            PipelineStatus::Done
        };

        info!(pipeline = %self.name, ?status, "pipeline finished");
        PipelineReport {
            pipeline: self.name,
            status,
            stages: reports,
        }
    }
}

/// Error-channel schema: the stage's input layout plus an error count and an
/// error message.
fn error_schema(input: &RowSchema) -> RowSchema {
    let mut schema = input.clone();
    schema.push(ColumnMeta::new("error_count", ValueKind::Integer));
    schema.push(ColumnMeta::new("error_message", ValueKind::String));
    schema
}

fn push_to_target(targets: &mut Vec<OutputTarget>, stage: &str, producer: RowProducer) {
    match targets.iter_mut().find(|t| t.stage == stage) {
        Some(target) => target.producers.push(producer),
        None => targets.push(OutputTarget {
            stage: stage.to_string(),
            producers: vec![producer],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_schema_appends_count_and_message() {
        let input = RowSchema::new().with_column(ColumnMeta::new("id", ValueKind::Integer));
        let schema = error_schema(&input);
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.index_of("error_count"), Some(1));
        assert_eq!(schema.index_of("error_message"), Some(2));
    }
}
