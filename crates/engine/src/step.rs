//! The step contract every stage implements, plus the step-type registry.
//!
//! A step sees two things from the engine: its input rows, one at a time, and a
//! [`StepOutput`] it emits rows through. The engine never inspects step
//! internals; steps never touch channels directly.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use tokio::sync::watch;

use rowflow_common::{EngineConfig, MetricsRegistry, Result, RowflowError};
use rowflow_core::{Row, RowSchema};

use crate::channel::RowProducer;

/// Per-row transform logic of one stage copy.
#[async_trait]
pub trait Step: Send {
    /// Declare how the (possibly merged) input schemas map to this stage's
    /// output schema. Called once per copy during pipeline wiring, before any
    /// row flows; `inputs` holds one schema per upstream stage, in edge order
    /// (empty for source steps).
    fn output_schema(&mut self, inputs: &[Arc<RowSchema>]) -> Result<Arc<RowSchema>>;

    /// Transform one input row, emitting zero or more output rows.
    async fn process_row(&mut self, row: Row, out: &mut StepOutput<'_>) -> Result<()>;

    /// End-of-stream hook, called once after every input is exhausted. Steps
    /// that buffer state (the sort stage's merge phase, source steps) emit
    /// here.
    async fn finish(&mut self, out: &mut StepOutput<'_>) -> Result<()> {
        let _ = out;
        Ok(())
    }
}

/// All channels from one producer copy toward the copies of one downstream stage.
#[derive(Debug)]
pub struct OutputTarget {
    /// Downstream stage name.
    pub stage: String,
    /// One producer per downstream copy.
    pub producers: Vec<RowProducer>,
}

/// Row emission surface handed to a step.
///
/// `push` broadcasts to every downstream stage; `push_to` sends to one named
/// downstream stage (conditional routing). Both honor channel backpressure and
/// observe the pipeline stop signal at every blocking point.
pub struct StepOutput<'a> {
    targets: &'a mut Vec<OutputTarget>,
    stop: &'a mut watch::Receiver<bool>,
    rows_written: &'a mut u64,
}

impl<'a> StepOutput<'a> {
    pub(crate) fn new(
        targets: &'a mut Vec<OutputTarget>,
        stop: &'a mut watch::Receiver<bool>,
        rows_written: &'a mut u64,
    ) -> Self {
        Self {
            targets,
            stop,
            rows_written,
        }
    }

    /// Emit a row to every downstream stage (and every copy of each).
    pub async fn push(&mut self, row: Row) -> Result<()> {
        let mut producers: Vec<&mut RowProducer> = self
            .targets
            .iter_mut()
            .flat_map(|t| t.producers.iter_mut())
            .collect();
        if let Some(last) = producers.pop() {
            for producer in producers {
                send_guarded(producer, row.clone(), self.stop).await?;
            }
            send_guarded(last, row, self.stop).await?;
        }
        *self.rows_written += 1;
        Ok(())
    }

    /// Emit a row to the named downstream stage only.
    pub async fn push_to(&mut self, stage: &str, row: Row) -> Result<()> {
        let Some(target) = self.targets.iter_mut().find(|t| t.stage == stage) else {
            return Err(RowflowError::Execution(format!(
                "no output channel toward stage '{stage}'"
            )));
        };
        let mut producers: Vec<&mut RowProducer> = target.producers.iter_mut().collect();
        if let Some(last) = producers.pop() {
            for producer in producers {
                send_guarded(producer, row.clone(), self.stop).await?;
            }
            send_guarded(last, row, self.stop).await?;
        }
        *self.rows_written += 1;
        Ok(())
    }

    /// Names of the downstream stages reachable from this step.
    pub fn target_stages(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.stage.as_str()).collect()
    }
}

/// Send one row, abandoning the wait if the pipeline stop signal fires.
pub(crate) async fn send_guarded(
    producer: &mut RowProducer,
    row: Row,
    stop: &mut watch::Receiver<bool>,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = stop.changed() => Err(stop_error()),
        res = producer.send(row) => res,
    }
}

/// Error surfaced from a blocking point interrupted by cancellation. Workers
/// translate it into the `Stopped` terminal status by consulting the stop flag.
pub(crate) fn stop_error() -> RowflowError {
    RowflowError::Execution("pipeline stop requested".to_string())
}

/// Everything a factory needs to build one step instance for one stage copy.
#[derive(Debug, Clone)]
pub struct StepBuildContext {
    /// Pipeline name, for metrics labels.
    pub pipeline: String,
    /// Stage name this instance runs as.
    pub stage: String,
    /// Copy index of this instance.
    pub copy: u16,
    /// Stage-level configuration from the pipeline definition.
    pub config: serde_json::Value,
    /// Engine-wide defaults.
    pub engine: EngineConfig,
    /// Metrics sink shared by the pipeline.
    pub metrics: MetricsRegistry,
}

/// Factory contract mapping a step-type name to step instances.
pub trait StepFactory: Send + Sync {
    /// Stable step-type name used by `StageSpec::step_type`.
    fn name(&self) -> &str;

    /// Build one step instance for one stage copy.
    fn build(&self, ctx: &StepBuildContext) -> Result<Box<dyn Step>>;
}

/// Registry of step factories, keyed by step-type name.
#[derive(Default)]
pub struct StepRegistry {
    inner: RwLock<HashMap<String, Arc<dyn StepFactory>>>,
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.inner.read().map(|m| m.len()).unwrap_or_default();
        f.debug_struct("StepRegistry")
            .field("factories", &count)
            .finish()
    }
}

impl StepRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in step types.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::steps::register_builtin_steps(&registry);
        registry
    }

    /// Register or replace a factory.
    ///
    /// Returns `true` when an existing factory with the same name was replaced.
    pub fn register(&self, factory: Arc<dyn StepFactory>) -> bool {
        self.inner
            .write()
            .expect("step registry lock poisoned")
            .insert(factory.name().to_string(), factory)
            .is_some()
    }

    /// Fetch a factory by step-type name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn StepFactory>> {
        self.inner
            .read()
            .expect("step registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// List registered step-type names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .inner
            .read()
            .expect("step registry lock poisoned")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

fn global_registry() -> &'static Arc<StepRegistry> {
    static REGISTRY: OnceLock<Arc<StepRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Arc::new(StepRegistry::with_builtins()))
}

/// Global step registry, pre-populated with the built-in step types.
pub fn global_step_registry() -> Arc<StepRegistry> {
    Arc::clone(global_registry())
}
