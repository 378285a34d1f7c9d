//! Stage workers: one concurrently scheduled run loop per stage copy.

use futures::future::select_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use rowflow_common::{MetricsRegistry, Result, RowflowError};
use rowflow_core::{Row, Value};

use crate::channel::{RowConsumer, RowProducer, is_disconnect};
use crate::step::{OutputTarget, Step, StepOutput, send_guarded};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Wired but not yet started.
    Initialized,
    /// Pulling, transforming, and pushing rows.
    Running,
    /// Cancellation observed, closing outputs.
    Stopping,
    /// Finished cleanly.
    Done,
    /// Terminated by an unrecoverable error.
    Errored,
}

/// Terminal status of one stage copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// All inputs exhausted, outputs flushed and closed.
    Done,
    /// Failed with an unrecoverable error.
    Errored,
    /// Halted cooperatively by the pipeline stop signal.
    Stopped,
}

/// Outcome of one stage copy, surfaced in the pipeline report.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    /// Stage name.
    pub stage: String,
    /// Copy index.
    pub copy: u16,
    /// Terminal status.
    pub status: StageStatus,
    /// Rows consumed from input channels.
    pub rows_read: u64,
    /// Rows emitted to main output channels.
    pub rows_written: u64,
    /// Rows shunted to the error channel.
    pub errors: u64,
    /// Root cause when `status` is `Errored`.
    pub error: Option<String>,
}

/// How a worker with several inputs orders its reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPolicy {
    /// Interleave all inputs, taking whichever has a row ready.
    RoundRobin,
    /// Fully drain the first `count` inputs, in order, before interleaving the
    /// rest (lookup-style steps).
    DrainFirst {
        /// Number of leading inputs to drain first.
        count: usize,
    },
}

/// One stage copy: owns its step instance and its channel endpoints, and drives
/// the pull/transform/push loop until exhaustion, a fatal error, or
/// cancellation.
pub struct StageWorker {
    pipeline: String,
    stage: String,
    copy: u16,
    step: Box<dyn Step>,
    inputs: Vec<RowConsumer>,
    input_policy: InputPolicy,
    outputs: Vec<OutputTarget>,
    error_outputs: Vec<RowProducer>,
    stop: watch::Receiver<bool>,
    metrics: MetricsRegistry,
    state: WorkerState,
}

enum NextRow {
    Row(Row),
    Exhausted,
    Stopped,
}

impl StageWorker {
    /// Wire a worker from its step and channel endpoints.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        pipeline: String,
        stage: String,
        copy: u16,
        step: Box<dyn Step>,
        inputs: Vec<RowConsumer>,
        input_policy: InputPolicy,
        outputs: Vec<OutputTarget>,
        error_outputs: Vec<RowProducer>,
        stop: watch::Receiver<bool>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            pipeline,
            stage,
            copy,
            step,
            inputs,
            input_policy,
            outputs,
            error_outputs,
            stop,
            metrics,
            state: WorkerState::Initialized,
        }
    }

    /// Run the stage copy to completion and report its outcome.
    pub async fn run(mut self) -> StageReport {
        debug!(stage = %self.stage, copy = self.copy, "stage worker starting");
        self.state = WorkerState::Running;

        let mut rows_read: u64 = 0;
        let mut rows_written: u64 = 0;
        let mut errors: u64 = 0;
        let mut failure: Option<RowflowError> = None;
        let mut drain_remaining = match self.input_policy {
            InputPolicy::RoundRobin => 0,
            InputPolicy::DrainFirst { count } => count.min(self.inputs.len()),
        };

        loop {
            let next = next_row(&mut self.inputs, &mut self.stop, &mut drain_remaining).await;
            match next {
                NextRow::Stopped => {
                    self.state = WorkerState::Stopping;
                    break;
                }
                NextRow::Exhausted => break,
                NextRow::Row(row) => {
                    rows_read += 1;
                    let keep = if self.error_outputs.is_empty() {
                        None
                    } else {
                        Some(row.clone())
                    };
                    let mut out =
                        StepOutput::new(&mut self.outputs, &mut self.stop, &mut rows_written);
                    match self.step.process_row(row, &mut out).await {
                        Ok(()) => {}
                        Err(e) if self.halting(&e) => {
                            self.state = WorkerState::Stopping;
                            break;
                        }
                        Err(e) => match keep {
                            Some(bad_row) => {
                                errors += 1;
                                warn!(
                                    stage = %self.stage,
                                    copy = self.copy,
                                    error = %e,
                                    "routing failed row to error channel"
                                );
                                if let Err(route_err) = self.emit_error_row(bad_row, &e).await {
                                    if self.halting(&route_err) {
                                        self.state = WorkerState::Stopping;
                                    } else {
                                        failure = Some(route_err);
                                    }
                                    break;
                                }
                            }
                            None => {
                                failure = Some(e);
                                break;
                            }
                        },
                    }
                }
            }
        }

        // End-of-stream flush, only after a clean exhaustion.
        if failure.is_none() && self.state == WorkerState::Running {
            let mut out = StepOutput::new(&mut self.outputs, &mut self.stop, &mut rows_written);
            if let Err(e) = self.step.finish(&mut out).await {
                if self.halting(&e) {
                    self.state = WorkerState::Stopping;
                } else {
                    failure = Some(e);
                }
            }
        }

        // Close every output, whatever happened: downstream consumers must
        // observe exhaustion instead of blocking forever.
        for target in &mut self.outputs {
            for producer in &mut target.producers {
                producer.mark_done();
            }
        }
        for producer in &mut self.error_outputs {
            producer.mark_done();
        }

        self.metrics.record_stage(
            &self.pipeline,
            &self.stage,
            self.copy,
            rows_read,
            rows_written,
            errors,
        );

        let status = match (&failure, self.state) {
            (Some(_), _) => {
                self.state = WorkerState::Errored;
                StageStatus::Errored
            }
            (None, WorkerState::Stopping) => {
                self.state = WorkerState::Done;
                StageStatus::Stopped
            }
            (None, _) => {
                self.state = WorkerState::Done;
                StageStatus::Done
            }
        };

        match (&status, &failure) {
            (StageStatus::Errored, Some(e)) => {
                error!(stage = %self.stage, copy = self.copy, error = %e, "stage failed");
            }
            _ => {
                info!(
                    stage = %self.stage,
                    copy = self.copy,
                    rows_read,
                    rows_written,
                    errors,
                    ?status,
                    "stage finished"
                );
            }
        }

        StageReport {
            stage: self.stage,
            copy: self.copy,
            status,
            rows_read,
            rows_written,
            errors,
            error: failure.map(|e| e.to_string()),
        }
    }

    /// True when an error means "the pipeline is coming down", not a stage
    /// fault: the stop signal fired, or a downstream consumer already vanished.
    fn halting(&self, e: &RowflowError) -> bool {
        *self.stop.borrow() || is_disconnect(e)
    }

    async fn emit_error_row(&mut self, row: Row, cause: &RowflowError) -> Result<()> {
        let mut error_row = row;
        error_row.push(Value::Integer(1));
        error_row.push(Value::String(cause.to_string()));

        let mut producers: Vec<&mut RowProducer> = self.error_outputs.iter_mut().collect();
        if let Some(last) = producers.pop() {
            for producer in producers {
                send_guarded(producer, error_row.clone(), &mut self.stop).await?;
            }
            send_guarded(last, error_row, &mut self.stop).await?;
        }
        Ok(())
    }
}

/// Pull the next row according to the input policy.
///
/// Exhausted channels are dropped from the set; `Exhausted` is returned only
/// once every input has reported done-and-drained. The stop signal is observed
/// at every blocking point.
async fn next_row(
    inputs: &mut Vec<RowConsumer>,
    stop: &mut watch::Receiver<bool>,
    drain_remaining: &mut usize,
) -> NextRow {
    // Drain-first inputs are read to exhaustion one at a time, in order.
    while *drain_remaining > 0 {
        if inputs.is_empty() {
            return NextRow::Exhausted;
        }
        let polled = {
            let recv = inputs[0].recv();
            tokio::select! {
                biased;
                _ = stop.changed() => None,
                row = recv => Some(row),
            }
        };
        match polled {
            None => return NextRow::Stopped,
            Some(Some(row)) => return NextRow::Row(row),
            Some(None) => {
                inputs.remove(0);
                *drain_remaining -= 1;
            }
        }
    }

    loop {
        if inputs.is_empty() {
            return NextRow::Exhausted;
        }
        let polled = {
            let recvs: Vec<_> = inputs.iter_mut().map(|c| Box::pin(c.recv())).collect();
            let any_input = select_all(recvs);
            tokio::select! {
                biased;
                _ = stop.changed() => None,
                (row, idx, _) = any_input => Some((row, idx)),
            }
        };
        match polled {
            None => return NextRow::Stopped,
            Some((Some(row), _)) => return NextRow::Row(row),
            Some((None, idx)) => {
                inputs.remove(idx);
            }
        }
    }
}
