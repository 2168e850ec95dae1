//! Metrics and observability utilities
//!
//! Prometheus-style counters, gauges and histograms for every pipeline stage
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Spillscope metrics
pub const METRICS_PREFIX: &str = "spillscope";

/// Buckets for classifier latency (in seconds)
pub const LABELER_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Ingestion metrics
    describe_counter!(
        format!("{}_records_canonicalized_total", METRICS_PREFIX),
        Unit::Count,
        "Records accepted by the canonicalizer"
    );

    describe_counter!(
        format!("{}_records_rejected_total", METRICS_PREFIX),
        Unit::Count,
        "Records rejected by the canonicalizer"
    );

    describe_counter!(
        format!("{}_graph_nodes_inserted_total", METRICS_PREFIX),
        Unit::Count,
        "Nodes inserted or resolved in the citation graph"
    );

    describe_counter!(
        format!("{}_graph_edges_inserted_total", METRICS_PREFIX),
        Unit::Count,
        "Distinct citation edges inserted"
    );

    // Labeling metrics
    describe_counter!(
        format!("{}_labels_created_total", METRICS_PREFIX),
        Unit::Count,
        "Label records created, by method"
    );

    describe_counter!(
        format!("{}_labeler_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Automated classifier calls, by outcome"
    );

    describe_counter!(
        format!("{}_labeler_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Automated classifier retries after transient failure"
    );

    describe_histogram!(
        format!("{}_labeler_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Automated classifier latency in seconds"
    );

    // Audit metrics
    describe_gauge!(
        format!("{}_audit_queue_depth", METRICS_PREFIX),
        Unit::Count,
        "Open audit queue entries, by priority band"
    );

    describe_counter!(
        format!("{}_adjudications_total", METRICS_PREFIX),
        Unit::Count,
        "Adjudication actions applied, by decision"
    );

    // Metrics engine
    describe_histogram!(
        format!("{}_metrics_pass_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Metrics engine pass duration in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Times one metrics engine pass
pub struct PassTimer {
    start: Instant,
    pass: &'static str,
}

impl PassTimer {
    /// Start timing a pass
    pub fn start(pass: &'static str) -> Self {
        Self {
            start: Instant::now(),
            pass,
        }
    }

    /// Record pass completion
    pub fn finish(self) {
        histogram!(
            format!("{}_metrics_pass_duration_seconds", METRICS_PREFIX),
            "pass" => self.pass
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

/// Helper to record canonicalizer outcomes
pub fn record_canonicalization(accepted: bool) {
    let name = if accepted {
        "records_canonicalized_total"
    } else {
        "records_rejected_total"
    };
    counter!(format!("{}_{}", METRICS_PREFIX, name)).increment(1);
}

/// Helper to record graph growth
pub fn record_graph_insert(nodes: u64, edges: u64) {
    counter!(format!("{}_graph_nodes_inserted_total", METRICS_PREFIX)).increment(nodes);
    counter!(format!("{}_graph_edges_inserted_total", METRICS_PREFIX)).increment(edges);
}

/// Helper to record a created label
pub fn record_label(method: &str) {
    counter!(
        format!("{}_labels_created_total", METRICS_PREFIX),
        "method" => method.to_string()
    )
    .increment(1);
}

/// Helper to record classifier calls
pub fn record_labeler_call(duration_secs: f64, model: &str, outcome: &str) {
    counter!(
        format!("{}_labeler_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_labeler_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a retry
pub fn record_labeler_retry(model: &str) {
    counter!(
        format!("{}_labeler_retries_total", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .increment(1);
}

/// Helper to record queue depth for a band
pub fn record_queue_depth(band: &str, depth: usize) {
    gauge!(
        format!("{}_audit_queue_depth", METRICS_PREFIX),
        "band" => band.to_string()
    )
    .set(depth as f64);
}

/// Helper to record an adjudication
pub fn record_adjudication(decision: &str) {
    counter!(
        format!("{}_adjudications_total", METRICS_PREFIX),
        "decision" => decision.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labeler_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in LABELER_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_pass_timer() {
        let timer = PassTimer::start("structural");
        std::thread::sleep(std::time::Duration::from_millis(5));
        timer.finish();
        // Just verify it runs without panic
    }
}
