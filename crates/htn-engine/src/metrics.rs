// Copyright 2026 Covenant Labs

//! Execution metrics: queue depth, tasks completed/failed, parallelization
//! factor, end-to-end duration. Counters are lock-free atomics
//! (`prometheus`'s `IntCounter`/`IntGauge` are backed by `AtomicU64`
//! internally); histograms carry a `worker` label so each worker writes
//! its own shard and the registry merges them on scrape.
//!
//! There is no process-wide singleton: a caller builds one [`Metrics`] per
//! [`crate::Context`] and passes it in rather than reaching for a global.

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
};

/// Metrics for one engine [`crate::Context`]. Cloning is cheap: every
/// field is an `Arc`-backed `prometheus` handle.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub tasks_completed: IntCounter,
    pub tasks_failed: IntCounter,
    pub tasks_skipped: IntCounter,
    pub tasks_cancelled: IntCounter,
    pub tasks_retried: IntCounter,
    pub queue_depth: IntGauge,
    pub parallelization_factor: prometheus::Gauge,
    pub graph_duration_seconds: Histogram,
    /// Per-worker task duration, labeled `worker="<index>"`.
    task_duration_by_worker: HistogramVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tasks_completed = IntCounter::with_opts(Opts::new(
            "htn_tasks_completed_total",
            "Tasks that reached the COMPLETED state",
        ))?;
        let tasks_failed = IntCounter::with_opts(Opts::new(
            "htn_tasks_failed_total",
            "Tasks that reached the FAILED state with retries exhausted",
        ))?;
        let tasks_skipped = IntCounter::with_opts(Opts::new(
            "htn_tasks_skipped_total",
            "Tasks SKIPPED because a required prerequisite failed",
        ))?;
        let tasks_cancelled = IntCounter::with_opts(Opts::new(
            "htn_tasks_cancelled_total",
            "Tasks CANCELLED by graph-wide cancellation",
        ))?;
        let tasks_retried = IntCounter::with_opts(Opts::new(
            "htn_tasks_retried_total",
            "Task attempts that were retried after a transient failure",
        ))?;
        let queue_depth = IntGauge::with_opts(Opts::new(
            "htn_ready_queue_depth",
            "Tasks currently waiting in the ready queue across all workers",
        ))?;
        let parallelization_factor = prometheus::Gauge::with_opts(Opts::new(
            "htn_parallelization_factor",
            "Fraction of tasks in the most recent graph that ran concurrently with another",
        ))?;
        let graph_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "htn_graph_duration_seconds",
            "Wall-clock duration of a complete graph execution",
        ))?;
        let task_duration_by_worker = HistogramVec::new(
            HistogramOpts::new("htn_task_duration_seconds", "Per-task tool invocation duration"),
            &["worker"],
        )?;

        registry.register(Box::new(tasks_completed.clone()))?;
        registry.register(Box::new(tasks_failed.clone()))?;
        registry.register(Box::new(tasks_skipped.clone()))?;
        registry.register(Box::new(tasks_cancelled.clone()))?;
        registry.register(Box::new(tasks_retried.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(parallelization_factor.clone()))?;
        registry.register(Box::new(graph_duration_seconds.clone()))?;
        registry.register(Box::new(task_duration_by_worker.clone()))?;

        Ok(Self {
            registry,
            tasks_completed,
            tasks_failed,
            tasks_skipped,
            tasks_cancelled,
            tasks_retried,
            queue_depth,
            parallelization_factor,
            graph_duration_seconds,
            task_duration_by_worker,
        })
    }

    /// Record a task's tool-invocation duration under its worker's shard.
    pub fn observe_task_duration(&self, worker: usize, duration_ms: u64) {
        self.task_duration_by_worker
            .with_label_values(&[&worker.to_string()])
            .observe(duration_ms as f64 / 1000.0);
    }

    /// Fraction of `total` tasks that overlapped with at least one other
    /// task in the same execution (the "parallelization factor").
    /// `concurrent` counts tasks observed running alongside another at
    /// dispatch time.
    pub fn record_parallelization_factor(&self, concurrent: usize, total: usize) {
        let factor = if total == 0 { 0.0 } else { concurrent as f64 / total as f64 };
        self.parallelization_factor.set(factor);
    }

    /// Render the current state of every registered collector in the
    /// Prometheus text exposition format, for a caller's own `/metrics`
    /// endpoint (the exporter itself is an external collaborator).
    pub fn render(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metric descriptors are statically valid")
    }
}
