//! Metrics collection.
//!
//! # Metrics
//! - `gateway_client_requests_total` (counter): transport round-trips by method, status
//! - `gateway_client_request_duration_seconds` (histogram): round-trip latency
//! - `gateway_client_offline_rejections_total` (counter): requests failed fast while offline
//! - `gateway_client_dedup_total` (counter): deduplicated reads by outcome (hit/miss)
//! - `gateway_client_token_refresh_total` (counter): refresh attempts by outcome
//! - `gateway_client_retries_total` (counter): backoff retries scheduled
//! - `gateway_client_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_client_circuit_rejections_total` (counter): calls failed fast by an open circuit
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; the host application installs the exporter
//! - No per-path labels to keep cardinality bounded (circuit keys are chosen by call sites)

use std::time::Instant;

/// Record a completed transport round-trip. `status` is 0 when no response arrived.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    metrics::counter!(
        "gateway_client_requests_total",
        "method" => method.to_string(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "gateway_client_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_offline_rejection() {
    metrics::counter!("gateway_client_offline_rejections_total").increment(1);
}

/// Record a deduplicator lookup: `hit` when an in-flight request was joined.
pub fn record_dedup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    metrics::counter!("gateway_client_dedup_total", "outcome" => outcome).increment(1);
}

/// Record a refresh outcome: success, failure, timeout, offline or skipped.
pub fn record_token_refresh(outcome: &'static str) {
    metrics::counter!("gateway_client_token_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_retry() {
    metrics::counter!("gateway_client_retries_total").increment(1);
}

/// Record a circuit state for `key` (0=closed, 1=half-open, 2=open).
pub fn record_circuit_state(key: &str, state: u8) {
    metrics::gauge!("gateway_client_circuit_state", "key" => key.to_string()).set(state as f64);
}

pub fn record_circuit_rejection(key: &str) {
    metrics::counter!("gateway_client_circuit_rejections_total", "key" => key.to_string())
        .increment(1);
}
