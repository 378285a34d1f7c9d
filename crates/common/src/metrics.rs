use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Per-stage execution metrics shared by every worker in a pipeline.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    stage_rows_read: CounterVec,
    stage_rows_written: CounterVec,
    stage_errors: CounterVec,
    sort_spill_bytes: CounterVec,
    sort_spill_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_stage(
        &self,
        pipeline: &str,
        stage: &str,
        copy: u16,
        rows_read: u64,
        rows_written: u64,
        errors: u64,
    ) {
        let labels = [pipeline, stage, &copy.to_string()];
        self.inner
            .stage_rows_read
            .with_label_values(&labels)
            .inc_by(rows_read as f64);
        self.inner
            .stage_rows_written
            .with_label_values(&labels)
            .inc_by(rows_written as f64);
        self.inner
            .stage_errors
            .with_label_values(&labels)
            .inc_by(errors as f64);
    }

    pub fn record_spill(&self, pipeline: &str, stage: &str, copy: u16, bytes: u64, secs: f64) {
        let labels = [pipeline, stage, &copy.to_string()];
        self.inner
            .sort_spill_bytes
            .with_label_values(&labels)
            .inc_by(bytes as f64);
        self.inner
            .sort_spill_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let stage_rows_read = counter_vec(
            &registry,
            "rowflow_stage_rows_read_total",
            "Input rows consumed per stage copy",
            &["pipeline", "stage", "copy"],
        );
        let stage_rows_written = counter_vec(
            &registry,
            "rowflow_stage_rows_written_total",
            "Output rows produced per stage copy",
            &["pipeline", "stage", "copy"],
        );
        let stage_errors = counter_vec(
            &registry,
            "rowflow_stage_errors_total",
            "Rows routed to error handling per stage copy",
            &["pipeline", "stage", "copy"],
        );
        let sort_spill_bytes = counter_vec(
            &registry,
            "rowflow_sort_spill_bytes_total",
            "Sort spill bytes written",
            &["pipeline", "stage", "copy"],
        );
        let sort_spill_seconds = histogram_vec(
            &registry,
            "rowflow_sort_spill_seconds",
            "Sort spill write time",
            &["pipeline", "stage", "copy"],
        );

        Self {
            registry,
            stage_rows_read,
            stage_rows_written,
            stage_errors,
            sort_spill_bytes,
            sort_spill_seconds,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// Shared registry used when the caller does not provide one.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
