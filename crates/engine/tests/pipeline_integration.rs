//! End-to-end pipeline runs through the public API: wiring, streaming,
//! sorting with spills, error routing, cancellation, and parallel copies.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use rowflow_common::{EngineConfig, MetricsRegistry, Result, RowflowError};
use rowflow_core::{ColumnMeta, Row, RowSchema, Value, ValueKind};
use rowflow_engine::steps::{CollectFactory, CollectedRows, GeneratorConfig};
use rowflow_engine::{
    Pipeline, PipelineSpec, PipelineStatus, StageSpec, StageStatus, Step, StepBuildContext,
    StepFactory, StepOutput, StepRegistry,
};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn id_schema() -> RowSchema {
    RowSchema::new().with_column(ColumnMeta::new("id", ValueKind::Integer))
}

fn int_of(row: &Row) -> i64 {
    match row.get(0) {
        Some(Value::Integer(i)) => *i,
        other => panic!("unexpected cell {other:?}"),
    }
}

fn generator_stage(name: &str, values: Vec<i64>) -> StageSpec {
    let config = GeneratorConfig {
        schema: id_schema(),
        rows: values.into_iter().map(|i| vec![Value::Integer(i)]).collect(),
        repeat: 1,
    };
    StageSpec::new(name, "row_generator")
        .with_config(serde_json::to_value(config).expect("generator config"))
}

fn spill_dir(tag: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("rowflow_pipeline_test_{tag}_{nanos}"))
        .to_string_lossy()
        .into_owned()
}

fn registry_with_sink(name: &str, sink: &CollectedRows) -> StepRegistry {
    let registry = StepRegistry::with_builtins();
    registry.register(Arc::new(CollectFactory::new(name, sink.clone())));
    registry
}

/// Fails every row whose first cell is negative; passes the rest through.
struct FailNegativeFactory;

struct FailNegativeStep;

#[async_trait]
impl Step for FailNegativeStep {
    fn output_schema(&mut self, inputs: &[Arc<RowSchema>]) -> Result<Arc<RowSchema>> {
        inputs
            .first()
            .cloned()
            .ok_or_else(|| RowflowError::InvalidConfig("needs one input".to_string()))
    }

    async fn process_row(&mut self, row: Row, out: &mut StepOutput<'_>) -> Result<()> {
        if int_of(&row) < 0 {
            return Err(RowflowError::Execution(format!(
                "negative id {}",
                int_of(&row)
            )));
        }
        out.push(row).await
    }
}

impl StepFactory for FailNegativeFactory {
    fn name(&self) -> &str {
        "fail_negative"
    }

    fn build(&self, _ctx: &StepBuildContext) -> Result<Box<dyn Step>> {
        Ok(Box::new(FailNegativeStep))
    }
}

#[tokio::test]
async fn generate_sort_collect_with_spills() {
    init_tracing();
    let dir = spill_dir("sort");
    let sink = CollectedRows::new();
    let registry = registry_with_sink("collect_rows", &sink);

    let input: Vec<i64> = (0..100).map(|i| (i * 37) % 100).collect();
    let spec = PipelineSpec::new("sorted")
        .with_stage(generator_stage("gen", input))
        .with_stage(StageSpec::new("sort", "sort_rows").with_config(serde_json::json!({
            "keys": [{ "column": "id" }],
            "batch_rows": 8,
            "tmp_dir": dir,
        })))
        .with_stage(StageSpec::new("sink", "collect_rows"))
        .with_edge("gen", "sort")
        .with_edge("sort", "sink");

    let metrics = MetricsRegistry::new();
    let pipeline =
        Pipeline::prepare(&spec, &registry, &EngineConfig::default(), metrics.clone())
            .expect("prepare");
    let report = pipeline.run().await;

    assert_eq!(report.status, PipelineStatus::Done);
    let ids: Vec<i64> = sink.snapshot().iter().map(int_of).collect();
    assert_eq!(ids, (0..100).collect::<Vec<_>>());

    // Spilled run files are transient.
    assert_eq!(std::fs::read_dir(&dir).expect("spill dir").count(), 0);
    let _ = std::fs::remove_dir_all(dir);

    let text = metrics.render_prometheus();
    assert!(text.contains("rowflow_stage_rows_read_total"));
    assert!(text.contains("rowflow_sort_spill_bytes_total"));
}

#[tokio::test]
async fn filter_routes_true_and_false_to_named_stages() {
    init_tracing();
    let low = CollectedRows::new();
    let high = CollectedRows::new();
    let registry = StepRegistry::with_builtins();
    registry.register(Arc::new(CollectFactory::new("collect_low", low.clone())));
    registry.register(Arc::new(CollectFactory::new("collect_high", high.clone())));

    let spec = PipelineSpec::new("split")
        .with_stage(generator_stage("gen", (0..10).collect()))
        .with_stage(
            StageSpec::new("split", "filter_rows").with_config(serde_json::json!({
                "column": "id",
                "op": "lt",
                "value": { "integer": 5 },
                "send_true_to": "low",
                "send_false_to": "high",
            })),
        )
        .with_stage(StageSpec::new("low", "collect_low"))
        .with_stage(StageSpec::new("high", "collect_high"))
        .with_edge("gen", "split")
        .with_edge("split", "low")
        .with_edge("split", "high");

    let report = Pipeline::prepare(
        &spec,
        &registry,
        &EngineConfig::default(),
        MetricsRegistry::new(),
    )
    .expect("prepare")
    .run()
    .await;

    assert_eq!(report.status, PipelineStatus::Done);
    let mut low_ids: Vec<i64> = low.snapshot().iter().map(int_of).collect();
    let mut high_ids: Vec<i64> = high.snapshot().iter().map(int_of).collect();
    low_ids.sort_unstable();
    high_ids.sort_unstable();
    assert_eq!(low_ids, (0..5).collect::<Vec<_>>());
    assert_eq!(high_ids, (5..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn failed_rows_are_routed_with_an_error_message() {
    init_tracing();
    let good = CollectedRows::new();
    let bad = CollectedRows::new();
    let registry = StepRegistry::with_builtins();
    registry.register(Arc::new(FailNegativeFactory));
    registry.register(Arc::new(CollectFactory::new("collect_good", good.clone())));
    registry.register(Arc::new(CollectFactory::new("collect_bad", bad.clone())));

    let spec = PipelineSpec::new("error_routed")
        .with_stage(generator_stage("gen", vec![1, -2, 3, -4, 5]))
        .with_stage(StageSpec::new("check", "fail_negative").with_error_to("bad"))
        .with_stage(StageSpec::new("good", "collect_good"))
        .with_stage(StageSpec::new("bad", "collect_bad"))
        .with_edge("gen", "check")
        .with_edge("check", "good");

    let report = Pipeline::prepare(
        &spec,
        &registry,
        &EngineConfig::default(),
        MetricsRegistry::new(),
    )
    .expect("prepare")
    .run()
    .await;

    assert_eq!(report.status, PipelineStatus::Done);
    let good_ids: Vec<i64> = good.snapshot().iter().map(int_of).collect();
    assert_eq!(good_ids, vec![1, 3, 5]);

    let bad_rows = bad.snapshot();
    assert_eq!(bad_rows.len(), 2);
    for row in &bad_rows {
        // Original cell plus the appended error count and message.
        assert_eq!(row.arity(), 3);
        assert!(int_of(row) < 0);
        assert_eq!(row.get(1), Some(&Value::Integer(1)));
        match row.get(2) {
            Some(Value::String(msg)) => assert!(msg.contains("negative id")),
            other => panic!("expected error message, got {other:?}"),
        }
    }

    let check = report
        .stages
        .iter()
        .find(|r| r.stage == "check")
        .expect("check report");
    assert_eq!(check.errors, 2);
    assert_eq!(check.status, StageStatus::Done);
}

#[tokio::test]
async fn fatal_row_error_fails_the_pipeline_without_hanging() {
    init_tracing();
    let sink = CollectedRows::new();
    let registry = registry_with_sink("collect_rows", &sink);
    registry.register(Arc::new(FailNegativeFactory));

    let spec = PipelineSpec::new("fatal")
        .with_stage(generator_stage("gen", vec![1, 2, -3, 4]))
        .with_stage(StageSpec::new("check", "fail_negative"))
        .with_stage(StageSpec::new("sink", "collect_rows"))
        .with_edge("gen", "check")
        .with_edge("check", "sink");

    let pipeline = Pipeline::prepare(
        &spec,
        &registry,
        &EngineConfig::default(),
        MetricsRegistry::new(),
    )
    .expect("prepare");
    let report = tokio::time::timeout(Duration::from_secs(10), pipeline.run())
        .await
        .expect("pipeline must terminate");

    match report.status {
        PipelineStatus::Errored { stage, cause } => {
            assert_eq!(stage, "check");
            assert!(cause.contains("negative id"));
        }
        other => panic!("expected an errored pipeline, got {other:?}"),
    }
}

#[tokio::test]
async fn stop_handle_halts_a_running_pipeline() {
    init_tracing();
    let sink = CollectedRows::new();
    let registry = registry_with_sink("collect_rows", &sink);

    // A large repeated input over tiny channels keeps the pipeline busy long
    // enough for the stop to land mid-stream.
    let config = GeneratorConfig {
        schema: id_schema(),
        rows: (0..100).map(|i| vec![Value::Integer(i)]).collect(),
        repeat: 100_000,
    };
    let spec = PipelineSpec::new("cancelled")
        .with_stage(
            StageSpec::new("gen", "row_generator")
                .with_config(serde_json::to_value(config).expect("generator config")),
        )
        .with_stage(StageSpec::new("sink", "collect_rows"))
        .with_edge("gen", "sink");

    let engine = EngineConfig {
        channel_capacity: 4,
        ..EngineConfig::default()
    };
    let pipeline =
        Pipeline::prepare(&spec, &registry, &engine, MetricsRegistry::new()).expect("prepare");
    let stop = pipeline.stop_handle();

    let running = tokio::spawn(pipeline.run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.stop();

    let report = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("pipeline must terminate")
        .expect("pipeline task");
    assert_eq!(report.status, PipelineStatus::Stopped);
    assert!(
        (sink.len() as u64) < 100 * 100_000,
        "cancellation must land before the whole input streams through"
    );
}

#[tokio::test]
async fn every_copy_of_a_downstream_stage_sees_every_row() {
    init_tracing();
    let sink = CollectedRows::new();
    let registry = registry_with_sink("collect_rows", &sink);

    let spec = PipelineSpec::new("broadcast")
        .with_stage(generator_stage("gen", (0..20).collect()))
        .with_stage(StageSpec::new("sink", "collect_rows").with_copies(2))
        .with_edge("gen", "sink");

    let report = Pipeline::prepare(
        &spec,
        &registry,
        &EngineConfig::default(),
        MetricsRegistry::new(),
    )
    .expect("prepare")
    .run()
    .await;

    assert_eq!(report.status, PipelineStatus::Done);
    // Both copies share the sink handle, so each row lands twice.
    let mut ids: Vec<i64> = sink.snapshot().iter().map(int_of).collect();
    ids.sort_unstable();
    let expected: Vec<i64> = (0..20).flat_map(|i| [i, i]).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn drain_first_input_is_consumed_before_the_others() {
    init_tracing();
    let sink = CollectedRows::new();
    let registry = registry_with_sink("collect_rows", &sink);

    let spec = PipelineSpec::new("lookup_order")
        .with_stage(generator_stage("reference", (100..105).collect()))
        .with_stage(generator_stage("stream", (0..50).collect()))
        .with_stage(
            StageSpec::new("sink", "collect_rows").with_drain_first("reference"),
        )
        .with_edge("reference", "sink")
        .with_edge("stream", "sink");

    let report = Pipeline::prepare(
        &spec,
        &registry,
        &EngineConfig::default(),
        MetricsRegistry::new(),
    )
    .expect("prepare")
    .run()
    .await;

    assert_eq!(report.status, PipelineStatus::Done);
    let ids: Vec<i64> = sink.snapshot().iter().map(int_of).collect();
    assert_eq!(ids.len(), 55);
    // All reference rows arrive before any streamed row.
    assert_eq!(&ids[..5], &[100, 101, 102, 103, 104]);
    assert!(ids[5..].iter().all(|&i| i < 100));
}

#[tokio::test]
async fn select_projects_between_generator_and_sink() {
    init_tracing();
    let sink = CollectedRows::new();
    let registry = registry_with_sink("collect_rows", &sink);

    let config = GeneratorConfig {
        schema: RowSchema::new()
            .with_column(ColumnMeta::new("id", ValueKind::Integer))
            .with_column(ColumnMeta::new("name", ValueKind::String)),
        rows: vec![
            vec![Value::Integer(1), Value::String("one".into())],
            vec![Value::Integer(2), Value::String("two".into())],
        ],
        repeat: 1,
    };
    let spec = PipelineSpec::new("projected")
        .with_stage(
            StageSpec::new("gen", "row_generator")
                .with_config(serde_json::to_value(config).expect("generator config")),
        )
        .with_stage(
            StageSpec::new("pick", "select_values").with_config(serde_json::json!({
                "columns": [{ "name": "name", "rename": "label" }],
            })),
        )
        .with_stage(StageSpec::new("sink", "collect_rows"))
        .with_edge("gen", "pick")
        .with_edge("pick", "sink");

    let report = Pipeline::prepare(
        &spec,
        &registry,
        &EngineConfig::default(),
        MetricsRegistry::new(),
    )
    .expect("prepare")
    .run()
    .await;

    assert_eq!(report.status, PipelineStatus::Done);
    let rows = sink.snapshot();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], Row::from(vec![Value::String("one".into())]));
    assert_eq!(rows[1], Row::from(vec![Value::String("two".into())]));
}
