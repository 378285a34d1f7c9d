//! Row-streaming pipeline engine.
//!
//! A pipeline is a directed acyclic graph of named stages. Each stage runs one
//! or more concurrent copies of a [`Step`], connected by bounded single-producer
//! single-consumer row channels. Full channels push back on producers; drained
//! and closed channels signal exhaustion downstream, so completion sweeps
//! through the graph from sources to sinks.
//!
//! Architecture role:
//! - bounded row channels with backpressure and explicit exhaustion
//! - the step contract and the step-type registry
//! - per-copy worker loop with error routing and cancellation
//! - pipeline wiring (schema propagation, channel creation) and lifecycle
//! - built-in steps: generator, select, filter, external sort
//!
//! Key modules:
//! - [`channel`]
//! - [`step`]
//! - [`worker`]
//! - [`graph`]
//! - [`pipeline`]
//! - [`steps`]
//!
//! # Example
//!
//! ```no_run
//! use rowflow_common::{EngineConfig, MetricsRegistry};
//! use rowflow_core::{ColumnMeta, RowSchema, Value, ValueKind};
//! use rowflow_engine::graph::{PipelineSpec, StageSpec};
//! use rowflow_engine::pipeline::Pipeline;
//! use rowflow_engine::step::global_step_registry;
//! use rowflow_engine::steps::GeneratorConfig;
//!
//! # async fn demo() -> rowflow_common::Result<()> {
//! let schema = RowSchema::new().with_column(ColumnMeta::new("id", ValueKind::Integer));
//! let spec = PipelineSpec::new("demo")
//!     .with_stage(StageSpec::new("gen", "row_generator").with_config(
//!         serde_json::to_value(GeneratorConfig {
//!             schema,
//!             rows: vec![vec![Value::Integer(2)], vec![Value::Integer(1)]],
//!             repeat: 1,
//!         })
//!         .expect("generator config"),
//!     ))
//!     .with_stage(StageSpec::new("sort", "sort_rows").with_config(
//!         serde_json::json!({ "keys": [{ "column": "id" }] }),
//!     ))
//!     .with_edge("gen", "sort");
//!
//! let registry = global_step_registry();
//! let pipeline = Pipeline::prepare(
//!     &spec,
//!     &registry,
//!     &EngineConfig::default(),
//!     MetricsRegistry::new(),
//! )?;
//! let report = pipeline.run().await;
//! println!("{:?}", report.status);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod graph;
pub mod pipeline;
pub mod step;
pub mod steps;
pub mod worker;

pub use channel::{ChannelId, RowConsumer, RowProducer, row_channel};
pub use graph::{EdgeSpec, PipelineSpec, StageSpec};
pub use pipeline::{Pipeline, PipelineReport, PipelineStatus, StopHandle};
pub use step::{
    OutputTarget, Step, StepBuildContext, StepFactory, StepOutput, StepRegistry,
    global_step_registry,
};
pub use worker::{InputPolicy, StageReport, StageStatus};
