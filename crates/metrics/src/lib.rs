//! Metrics and tracing setup for vclocked.
//!
//! Provides a global [`StoreMetrics`] singleton backed by the `prometheus`
//! crate and a text encoder for scraping by an embedding process.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter. Later calls are
/// no-ops, so tests and embedders may both call it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

static METRICS: OnceLock<StoreMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static StoreMetrics {
    METRICS.get_or_init(StoreMetrics::new)
}

/// All Prometheus metrics for a vclocked store.
pub struct StoreMetrics {
    pub registry: Registry,

    // ── Single-key operations ──
    pub puts: IntCounter,
    pub gets: IntCounter,
    pub deletes: IntCounter,

    // ── Read repair ──
    pub read_repairs: IntCounter,
    pub versions_discarded: IntCounter,
    pub repair_cleanup_failures: IntCounter,

    // ── Pipelines ──
    pub scans: IntCounter,
    pub ingested_records: IntCounter,

    // ── Latency ──
    pub op_latency_secs: HistogramVec,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for StoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreMetrics").finish_non_exhaustive()
    }
}

/// Default histogram buckets (seconds) for operation latency.
const LATENCY_BUCKETS: &[f64] = &[0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5];

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("valid counter opts")
}

impl StoreMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let puts = counter("vclocked_puts_total", "Logical PUT operations");
        let gets = counter("vclocked_gets_total", "Logical GET operations");
        let deletes = counter("vclocked_deletes_total", "Logical DEL operations");
        let read_repairs = counter(
            "vclocked_read_repairs_total",
            "Repair passes that discarded at least one version",
        );
        let versions_discarded = counter(
            "vclocked_versions_discarded_total",
            "Versions classified as dominated or duplicate",
        );
        let repair_cleanup_failures = counter(
            "vclocked_repair_cleanup_failures_total",
            "Background deletions of discarded versions that failed",
        );
        let scans = counter("vclocked_scans_total", "Read streams opened");
        let ingested_records = counter(
            "vclocked_ingested_records_total",
            "Records acknowledged by write streams",
        );

        let op_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "vclocked_op_latency_seconds",
                "Store operation latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["op"],
        )
        .expect("op_latency_secs histogram");

        for c in [
            &puts,
            &gets,
            &deletes,
            &read_repairs,
            &versions_discarded,
            &repair_cleanup_failures,
            &scans,
            &ingested_records,
        ] {
            registry
                .register(Box::new(c.clone()))
                .expect("register counter");
        }
        registry
            .register(Box::new(op_latency_secs.clone()))
            .expect("register op_latency_secs");

        Self {
            registry,
            puts,
            gets,
            deletes,
            read_repairs,
            versions_discarded,
            repair_cleanup_failures,
            scans,
            ingested_records,
            op_latency_secs,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

/// Helper: start an operation latency timer. Records elapsed time on drop.
pub fn start_op_timer(op: &str) -> prometheus::HistogramTimer {
    metrics()
        .op_latency_secs
        .with_label_values(&[op])
        .start_timer()
}

// ────────────────────────── Tests ──────────────────────────
