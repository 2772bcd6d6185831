//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the Inkwell server:
//! - HTTP request metrics (latency, counts, auth failures)
//! - Worker pool and queue depth (collected dynamically)
//! - Everything registered by `inkwell_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tracing::warn;

use inkwell_core::queue::QueueName;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "inkwell_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("inkwell_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "inkwell_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Authentication failures.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "inkwell_auth_failures_total",
            "Total authentication failures",
        ),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Worker Metrics (collected dynamically)
// =============================================================================

/// Worker pool running state (1 = running, 0 = stopped).
pub static WORKERS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "inkwell_workers_running",
        "Whether the pipeline workers are running (1) or stopped (0)",
    )
    .unwrap()
});

/// Messages waiting or leased, per queue.
pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("inkwell_queue_depth", "Messages waiting or leased"),
        &["queue"],
    )
    .unwrap()
});

/// Parked messages.
pub static DEAD_LETTERS_PARKED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "inkwell_dead_letters_parked",
        "Messages currently parked in the dead-letter state",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    // Workers
    registry
        .register(Box::new(WORKERS_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(QUEUE_DEPTH.clone())).unwrap();
    registry
        .register(Box::new(DEAD_LETTERS_PARKED.clone()))
        .unwrap();

    // Core metrics (stages, jobs, LLM, cache)
    for metric in inkwell_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges from the worker pool and the queue before encoding.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    if let Some(workers) = state.workers() {
        let status = workers.status();
        WORKERS_RUNNING.set(i64::from(status.running));
        DEAD_LETTERS_PARKED.set(status.dead_letters as i64);
    }

    let queue = &state.context().queue;
    for name in QueueName::ALL {
        match queue.depth(name) {
            Ok(depth) => QUEUE_DEPTH
                .with_label_values(&[name.as_str()])
                .set(depth as i64),
            Err(e) => warn!(queue = %name, error = %e, "Failed to read queue depth"),
        }
    }
}

/// Collection segments whose next path segment is an identifier.
const ID_PARENTS: [&str; 5] = ["manuscripts", "jobs", "dead-letters", "artifacts", "human-edits"];

/// Normalize a path for metric labels (replace ids with placeholders).
pub fn normalize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut previous = "";
    for segment in path.split('/') {
        if !segment.is_empty() && ID_PARENTS.contains(&previous) {
            out.push("{id}");
        } else {
            out.push(segment);
        }
        previous = segment;
    }
    out.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_manuscript() {
        let path = "/api/v1/manuscripts/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/manuscripts/{id}");
    }

    #[test]
    fn test_normalize_path_nested_ids() {
        let path = "/api/v1/manuscripts/m-1/artifacts/line-editing";
        assert_eq!(normalize_path(path), "/api/v1/manuscripts/{id}/artifacts/{id}");
    }

    #[test]
    fn test_normalize_path_keeps_actions() {
        let path = "/api/v1/admin/dead-letters/42/requeue";
        assert_eq!(normalize_path(path), "/api/v1/admin/dead-letters/{id}/requeue");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
        assert_eq!(normalize_path("/api/v1/manuscripts"), "/api/v1/manuscripts");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("inkwell_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_core_metrics() {
        inkwell_core::metrics::DEAD_LETTERS.inc_by(0);
        WORKERS_RUNNING.set(0);
        QUEUE_DEPTH.with_label_values(&["analysis"]).set(0);

        let output = encode_metrics();
        assert!(output.contains("inkwell_workers_running"));
        assert!(output.contains("inkwell_queue_depth"));
        assert!(output.contains("inkwell_dead_letters_total"));
    }
}
