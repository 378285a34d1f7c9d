//! External sort: order an unbounded row stream under a fixed memory budget.
//!
//! Rows accumulate in an in-memory buffer of `batch_rows`. Each full buffer is
//! sorted and spilled to a temp-file run; once the input is exhausted the runs
//! are k-way merged, always emitting the minimum look-ahead row. When the whole
//! input fits in one buffer nothing touches disk. The in-memory sort is stable
//! and merge ties go to the lowest-numbered run, so equal-key rows keep arrival
//! order and reruns produce identical output.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use rowflow_common::{MetricsRegistry, Result, RowflowError};
use rowflow_core::{Row, RowComparator, RowSchema, SortKey};

use crate::step::{Step, StepBuildContext, StepFactory, StepOutput};
use crate::steps::spill::{RunCursor, SpillRun};

/// One sort key of a `sort_rows` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortKeySpec {
    /// Column name in the input schema.
    pub column: String,
    /// Ascending when true (the default), descending otherwise.
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

/// Configuration of a `sort_rows` stage. Omitted knobs fall back to the
/// engine-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortConfig {
    /// Sort keys, applied left-to-right.
    pub keys: Vec<SortKeySpec>,
    /// In-memory batch size in rows before a spill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_rows: Option<usize>,
    /// Gzip-compress spill runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    /// Directory for spill-run files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<PathBuf>,
}

pub(crate) struct ExternalSortStep {
    pipeline: String,
    stage: String,
    copy: u16,
    keys: Vec<SortKeySpec>,
    batch_rows: usize,
    compress: bool,
    tmp_dir: PathBuf,
    metrics: MetricsRegistry,
    comparator: Option<RowComparator>,
    arity: usize,
    buffer: Vec<Row>,
    runs: Vec<SpillRun>,
    seq: usize,
}

impl ExternalSortStep {
    fn comparator(&self) -> Result<&RowComparator> {
        self.comparator
            .as_ref()
            .ok_or_else(|| RowflowError::Execution("sort stage used before wiring".to_string()))
    }

    /// Sort the buffer and write it out as one run.
    fn spill_batch(&mut self) -> Result<()> {
        let cmp = self
            .comparator
            .as_ref()
            .ok_or_else(|| RowflowError::Execution("sort stage used before wiring".to_string()))?;
        // Stable: equal-key rows keep arrival order.
        self.buffer.sort_by(|a, b| cmp.compare(a, b));

        let started = Instant::now();
        let run = SpillRun::write(
            &self.tmp_dir,
            self.seq,
            &self.buffer,
            self.arity,
            self.compress,
        )?;
        let bytes = run.file_size()?;
        self.metrics.record_spill(
            &self.pipeline,
            &self.stage,
            self.copy,
            bytes,
            started.elapsed().as_secs_f64(),
        );
        debug!(
            stage = %self.stage,
            copy = self.copy,
            run = self.seq,
            rows = run.row_count(),
            bytes,
            "spilled sort run"
        );
        self.seq += 1;
        self.runs.push(run);
        self.buffer.clear();
        Ok(())
    }

    /// K-way merge across all spilled runs, streaming through `out`.
    async fn merge_runs(&mut self, out: &mut StepOutput<'_>) -> Result<()> {
        struct Lookahead {
            row: Row,
            cursor: RunCursor,
        }

        let mut actives: Vec<Lookahead> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            let mut cursor = run.open()?;
            if let Some(first) = cursor.next_row()? {
                actives.push(Lookahead { row: first, cursor });
            }
            // An empty run's cursor is dropped here, deleting its file.
        }
        debug!(stage = %self.stage, copy = self.copy, runs = actives.len(), "merging sort runs");

        let cmp = self.comparator()?.clone();
        while !actives.is_empty() {
            let mut min = 0;
            for i in 1..actives.len() {
                // Strict less-than keeps ties on the lowest run index.
                if cmp.compare(&actives[i].row, &actives[min].row) == Ordering::Less {
                    min = i;
                }
            }
            match actives[min].cursor.next_row()? {
                Some(next) => {
                    let emitted = std::mem::replace(&mut actives[min].row, next);
                    out.push(emitted).await?;
                }
                None => {
                    let finished = actives.remove(min);
                    out.push(finished.row).await?;
                    // Cursor dropped: run file deleted right away.
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Step for ExternalSortStep {
    fn output_schema(&mut self, inputs: &[Arc<RowSchema>]) -> Result<Arc<RowSchema>> {
        let [input] = inputs else {
            return Err(RowflowError::InvalidConfig(
                "sort rows takes exactly one input".to_string(),
            ));
        };
        let mut keys = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let column = input.index_of(&key.column).ok_or_else(|| {
                RowflowError::InvalidConfig(format!(
                    "sort rows: unknown key column '{}'",
                    key.column
                ))
            })?;
            keys.push(SortKey {
                column,
                ascending: key.ascending,
            });
        }
        self.comparator = Some(RowComparator::new(keys));
        self.arity = input.len();
        Ok(Arc::clone(input))
    }

    async fn process_row(&mut self, row: Row, _out: &mut StepOutput<'_>) -> Result<()> {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_rows {
            self.spill_batch()?;
        }
        Ok(())
    }

    async fn finish(&mut self, out: &mut StepOutput<'_>) -> Result<()> {
        if self.runs.is_empty() {
            // Single batch: the whole input fit in memory, nothing touched disk.
            let cmp = self.comparator()?.clone();
            self.buffer.sort_by(|a, b| cmp.compare(a, b));
            for row in std::mem::take(&mut self.buffer) {
                out.push(row).await?;
            }
            return Ok(());
        }
        if !self.buffer.is_empty() {
            // Spill the final partial batch so the merge reads uniform sources.
            self.spill_batch()?;
        }
        self.merge_runs(out).await
    }
}

/// Factory for `sort_rows`.
pub(crate) struct SortFactory;

impl StepFactory for SortFactory {
    fn name(&self) -> &str {
        "sort_rows"
    }

    fn build(&self, ctx: &StepBuildContext) -> Result<Box<dyn Step>> {
        let config: SortConfig = serde_json::from_value(ctx.config.clone()).map_err(|e| {
            RowflowError::InvalidConfig(format!("stage '{}': bad sort config: {e}", ctx.stage))
        })?;
        if config.keys.is_empty() {
            return Err(RowflowError::InvalidConfig(format!(
                "stage '{}': sort rows needs at least one key",
                ctx.stage
            )));
        }
        let batch_rows = config.batch_rows.unwrap_or(ctx.engine.sort_batch_rows);
        if batch_rows == 0 {
            return Err(RowflowError::InvalidConfig(format!(
                "stage '{}': sort batch size must be at least one row",
                ctx.stage
            )));
        }
        Ok(Box::new(ExternalSortStep {
            pipeline: ctx.pipeline.clone(),
            stage: ctx.stage.clone(),
            copy: ctx.copy,
            keys: config.keys,
            batch_rows,
            compress: config.compress.unwrap_or(ctx.engine.compress_spill),
            tmp_dir: config
                .tmp_dir
                .unwrap_or_else(|| PathBuf::from(&ctx.engine.spill_dir)),
            metrics: ctx.metrics.clone(),
            comparator: None,
            arity: 0,
            buffer: Vec::new(),
            runs: Vec::new(),
            seq: 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelId, row_channel};
    use crate::step::OutputTarget;
    use rowflow_core::{ColumnMeta, Value, ValueKind};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::sync::watch;

    fn temp_sort_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("rowflow_sort_test_{tag}_{nanos}"))
    }

    fn two_column_schema() -> Arc<RowSchema> {
        Arc::new(
            RowSchema::new()
                .with_column(ColumnMeta::new("id", ValueKind::Integer))
                .with_column(ColumnMeta::new("name", ValueKind::String)),
        )
    }

    fn build_sort(config: SortConfig) -> Box<dyn Step> {
        let ctx = StepBuildContext {
            pipeline: "t".into(),
            stage: "sort".into(),
            copy: 0,
            config: serde_json::to_value(config).expect("config"),
            engine: Default::default(),
            metrics: Default::default(),
        };
        SortFactory.build(&ctx).expect("build")
    }

    /// Drive a sort step by hand: feed `input`, finish, and return its output.
    async fn run_sort(mut step: Box<dyn Step>, schema: Arc<RowSchema>, input: Vec<Row>) -> Vec<Row> {
        step.output_schema(&[schema]).expect("wire");

        let capacity = input.len() + 8;
        let (producer, mut consumer) = row_channel(ChannelId::new("sort", 0, "out", 0), capacity);
        let mut targets = vec![OutputTarget {
            stage: "out".into(),
            producers: vec![producer],
        }];
        let (_stop_tx, mut stop_rx) = watch::channel(false);
        let mut rows_written = 0u64;

        {
            let mut out = StepOutput::new(&mut targets, &mut stop_rx, &mut rows_written);
            for row in input {
                step.process_row(row, &mut out).await.expect("process");
            }
            step.finish(&mut out).await.expect("finish");
        }
        for target in &mut targets {
            for p in &mut target.producers {
                p.mark_done();
            }
        }

        let mut got = Vec::new();
        while let Some(row) = consumer.recv().await {
            got.push(row);
        }
        assert_eq!(rows_written as usize, got.len());
        got
    }

    fn row(id: i64, name: &str) -> Row {
        Row::from(vec![Value::Integer(id), Value::String(name.into())])
    }

    fn sort_config(dir: &PathBuf, batch_rows: usize) -> SortConfig {
        SortConfig {
            keys: vec![SortKeySpec {
                column: "id".into(),
                ascending: true,
            }],
            batch_rows: Some(batch_rows),
            compress: Some(true),
            tmp_dir: Some(dir.clone()),
        }
    }

    #[tokio::test]
    async fn batch_of_one_forces_a_run_per_row() {
        // The worked example: three single-row runs merged back in order.
        let dir = temp_sort_dir("b1");
        let step = build_sort(sort_config(&dir, 1));
        let input = vec![row(3, "c"), row(1, "a"), row(2, "b")];
        let got = run_sort(step, two_column_schema(), input).await;
        assert_eq!(got, vec![row(1, "a"), row(2, "b"), row(3, "c")]);
        assert_eq!(std::fs::read_dir(&dir).expect("dir").count(), 0);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn single_batch_never_touches_disk() {
        let dir = temp_sort_dir("mem");
        let step = build_sort(sort_config(&dir, 100));
        let input: Vec<Row> = (0..50).rev().map(|i| row(i, "x")).collect();
        let got = run_sort(step, two_column_schema(), input).await;
        let ids: Vec<i64> = got
            .iter()
            .map(|r| match r.get(0) {
                Some(Value::Integer(i)) => *i,
                other => panic!("unexpected cell {other:?}"),
            })
            .collect();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());
        assert!(!dir.exists(), "in-memory sort must not create a spill dir");
    }

    #[tokio::test]
    async fn partial_final_batch_joins_the_merge() {
        // 10 rows with batch size 3: three full runs plus a partial one.
        let dir = temp_sort_dir("b3");
        let step = build_sort(sort_config(&dir, 3));
        let input: Vec<Row> = [7, 2, 9, 0, 5, 1, 8, 4, 6, 3]
            .iter()
            .map(|&i| row(i, "x"))
            .collect();
        let got = run_sort(step, two_column_schema(), input).await;
        assert_eq!(got.len(), 10, "merge must emit every spilled row");
        for (i, r) in got.iter().enumerate() {
            assert_eq!(r.get(0), Some(&Value::Integer(i as i64)));
        }
        assert_eq!(std::fs::read_dir(&dir).expect("dir").count(), 0);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn descending_keys_reverse_the_order() {
        let dir = temp_sort_dir("desc");
        let mut config = sort_config(&dir, 2);
        config.keys[0].ascending = false;
        let step = build_sort(config);
        let input = vec![row(1, "a"), row(3, "c"), row(2, "b")];
        let got = run_sort(step, two_column_schema(), input).await;
        assert_eq!(got, vec![row(3, "c"), row(2, "b"), row(1, "a")]);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn nulls_sort_first_across_spilled_runs() {
        let dir = temp_sort_dir("nulls");
        let step = build_sort(sort_config(&dir, 2));
        let input = vec![
            row(2, "b"),
            Row::from(vec![Value::Null, Value::String("n1".into())]),
            row(1, "a"),
            Row::from(vec![Value::Null, Value::String("n2".into())]),
        ];
        let got = run_sort(step, two_column_schema(), input).await;
        assert!(got[0].get(0).is_some_and(Value::is_null));
        assert!(got[1].get(0).is_some_and(Value::is_null));
        assert_eq!(got[2], row(1, "a"));
        assert_eq!(got[3], row(2, "b"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn equal_keys_keep_arrival_order_and_reruns_match() {
        let dir = temp_sort_dir("ties");
        let input = vec![
            row(1, "first"),
            row(2, "x"),
            row(1, "second"),
            row(1, "third"),
        ];
        let first = run_sort(
            build_sort(sort_config(&dir, 2)),
            two_column_schema(),
            input.clone(),
        )
        .await;
        let second = run_sort(
            build_sort(sort_config(&dir, 2)),
            two_column_schema(),
            input,
        )
        .await;
        assert_eq!(first, second, "reruns must order ties identically");
        assert_eq!(first[0], row(1, "first"));
        assert_eq!(first[1], row(1, "second"));
        assert_eq!(first[2], row(1, "third"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn uncompressed_spill_path_works_too() {
        let dir = temp_sort_dir("plain");
        let mut config = sort_config(&dir, 2);
        config.compress = Some(false);
        let step = build_sort(config);
        let input: Vec<Row> = (0..7).rev().map(|i| row(i, "x")).collect();
        let got = run_sort(step, two_column_schema(), input).await;
        assert_eq!(got.len(), 7);
        assert_eq!(got[0], row(0, "x"));
        assert_eq!(got[6], row(6, "x"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let ctx = StepBuildContext {
            pipeline: "t".into(),
            stage: "sort".into(),
            copy: 0,
            config: serde_json::json!({
                "keys": [{"column": "id"}],
                "batch_rows": 0
            }),
            engine: Default::default(),
            metrics: Default::default(),
        };
        assert!(SortFactory.build(&ctx).is_err());
    }

    #[test]
    fn empty_key_list_is_rejected() {
        let ctx = StepBuildContext {
            pipeline: "t".into(),
            stage: "sort".into(),
            copy: 0,
            config: serde_json::json!({ "keys": [] }),
            engine: Default::default(),
            metrics: Default::default(),
        };
        assert!(SortFactory.build(&ctx).is_err());
    }

    #[test]
    fn unknown_key_column_is_rejected_at_wiring() {
        let dir = temp_sort_dir("badkey");
        let mut step = build_sort(SortConfig {
            keys: vec![SortKeySpec {
                column: "ghost".into(),
                ascending: true,
            }],
            batch_rows: Some(10),
            compress: None,
            tmp_dir: Some(dir),
        });
        assert!(step.output_schema(&[two_column_schema()]).is_err());
    }
}
