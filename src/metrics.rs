//! Prometheus metrics for the dispatcher.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_invocation`, `record_primitive_latency`, …) are no-ops if
//! `init_metrics` was never called, so dispatch is always safe to run and
//! observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `crypto_dispatch_invocations_total` | Counter | `primitive`, `path` |
//! | `crypto_dispatch_failures_total` | Counter | `primitive`, `kind` |
//! | `crypto_dispatch_primitive_duration_seconds` | Histogram | `path` |
//! | `crypto_dispatch_offload_queue_depth` | Gauge | |
//! | `crypto_dispatch_worker_respawns_total` | Counter | |
//! | `crypto_dispatch_calibration_reloads_total` | Counter | `outcome` |

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    core::Collector, exponential_buckets, CounterVec, Encoder, HistogramOpts, HistogramVec,
    IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All dispatcher metrics, bundled so they live in a single [`OnceLock`].
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Dispatched calls by primitive and execution path.
    pub invocations_total: CounterVec,
    /// Failed calls by primitive and failure kind.
    pub failures_total: CounterVec,
    /// Primitive execution time by path (excludes queue wait).
    pub primitive_duration: HistogramVec,
    /// Requests queued for the offload pool and not yet claimed.
    pub offload_queue_depth: IntGauge,
    /// Offload workers replaced after a fault.
    pub worker_respawns: IntCounter,
    /// Calibration hot-reload attempts by outcome.
    pub calibration_reloads: CounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    /// Build every metric under `namespace` and register it with a private
    /// registry.
    fn build(namespace: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let invocations_total = CounterVec::new(
            Opts::new(
                format!("{namespace}_invocations_total"),
                "Dispatched primitive calls",
            ),
            &["primitive", "path"],
        )?;
        registry.register(Box::new(invocations_total.clone()))?;

        let failures_total = CounterVec::new(
            Opts::new(
                format!("{namespace}_failures_total"),
                "Failed primitive calls by failure kind",
            ),
            &["primitive", "kind"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        // 1µs .. ~4s
        let primitive_duration = HistogramVec::new(
            HistogramOpts::new(
                format!("{namespace}_primitive_duration_seconds"),
                "Primitive execution time per path",
            )
            .buckets(exponential_buckets(1e-6, 4.0, 12)?),
            &["path"],
        )?;
        registry.register(Box::new(primitive_duration.clone()))?;

        let offload_queue_depth = IntGauge::new(
            format!("{namespace}_offload_queue_depth"),
            "Offload requests waiting for a worker",
        )?;
        registry.register(Box::new(offload_queue_depth.clone()))?;

        let worker_respawns = IntCounter::new(
            format!("{namespace}_worker_respawns_total"),
            "Offload workers replaced after a fault",
        )?;
        registry.register(Box::new(worker_respawns.clone()))?;

        let calibration_reloads = CounterVec::new(
            Opts::new(
                format!("{namespace}_calibration_reloads_total"),
                "Calibration reload attempts",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(calibration_reloads.clone()))?;

        Ok(Self {
            registry,
            invocations_total,
            failures_total,
            primitive_duration,
            offload_queue_depth,
            worker_respawns,
            calibration_reloads,
        })
    }
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all dispatcher metrics in a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns the [`prometheus::Error`] if metric construction or registration
/// fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let built = Metrics::build("crypto_dispatch")?;
    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(built);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one dispatched call.
///
/// # Panics
///
/// This function never panics.
pub fn inc_invocation(primitive: &str, path: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .invocations_total
            .get_metric_with_label_values(&[primitive, path])
        {
            c.inc();
        }
    }
}

/// Count one failed call.
///
/// # Panics
///
/// This function never panics.
pub fn inc_failure(primitive: &str, kind: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .failures_total
            .get_metric_with_label_values(&[primitive, kind])
        {
            c.inc();
        }
    }
}

/// Record how long a primitive ran on `path`.
///
/// # Panics
///
/// This function never panics.
pub fn record_primitive_latency(path: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.primitive_duration.get_metric_with_label_values(&[path]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Set the offload queue depth gauge.
///
/// # Panics
///
/// This function never panics.
pub fn set_offload_queue_depth(depth: usize) {
    if let Some(m) = metrics() {
        m.offload_queue_depth
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }
}

/// Count one offload worker replacement.
///
/// # Panics
///
/// This function never panics.
pub fn inc_worker_respawn() {
    if let Some(m) = metrics() {
        m.worker_respawns.inc();
    }
}

/// Count one calibration reload attempt (`"applied"` or `"rejected"`).
///
/// # Panics
///
/// This function never panics.
pub fn inc_calibration_reload(outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.calibration_reloads.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
    }
}

/// Gather all registered metrics as a raw list of metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Snapshot of the dispatch counters.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Invocation counts keyed by `"primitive:path"`.
    pub invocations: HashMap<String, u64>,
    /// Failure counts keyed by `"primitive:kind"`.
    pub failures: HashMap<String, u64>,
    /// Worker replacements since start.
    pub worker_respawns: u64,
}

fn label<'a>(metric: &'a prometheus::proto::Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|l| l.get_name() == name)
        .map_or("unknown", |l| l.get_value())
}

fn summarize(m: &Metrics) -> MetricsSummary {
    let mut summary = MetricsSummary::default();

    for family in m.invocations_total.collect() {
        for metric in family.get_metric() {
            let key = format!("{}:{}", label(metric, "primitive"), label(metric, "path"));
            let value = metric.get_counter().get_value() as u64;
            summary.invocations.insert(key, value);
        }
    }

    for family in m.failures_total.collect() {
        for metric in family.get_metric() {
            let key = format!("{}:{}", label(metric, "primitive"), label(metric, "kind"));
            let value = metric.get_counter().get_value() as u64;
            summary.failures.insert(key, value);
        }
    }

    summary.worker_respawns = m.worker_respawns.get();
    summary
}

/// Return a structured summary of current counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn get_metrics_summary() -> MetricsSummary {
    metrics().map_or_else(MetricsSummary::default, summarize)
}
