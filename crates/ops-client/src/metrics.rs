//! Request metrics
//!
//! Emitted through the `metrics` facade; they are no-ops until the
//! application installs a recorder (the `ops-fetch` binary installs the
//! Prometheus one).
//!
//! - `ops_requests_total` (counter): label `status`
//! - `ops_request_duration_seconds` (histogram): label `status`
//! - `ops_retries_total` (counter): label `reason`
//! - `ops_token_recoveries_total` (counter)
//! - `ops_failures_total` (counter): label `kind`

/// Histogram buckets for `ops_request_duration_seconds`, 10ms to 60s.
pub const DURATION_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Record one completed HTTP exchange.
pub fn record_response(status: u16, duration_secs: f64) {
    let status = status.to_string();
    metrics::counter!("ops_requests_total", "status" => status.clone()).increment(1);
    metrics::histogram!("ops_request_duration_seconds", "status" => status).record(duration_secs);
}

/// Record a backoff-driven retry and what triggered it.
pub fn record_retry(reason: &str) {
    metrics::counter!("ops_retries_total", "reason" => reason.to_string()).increment(1);
}

/// Record a stale-token 401 recovery.
pub fn record_token_recovery() {
    metrics::counter!("ops_token_recoveries_total").increment(1);
}

/// Record a terminal failure by error kind.
pub fn record_failure(kind: &'static str) {
    metrics::counter!("ops_failures_total", "kind" => kind).increment(1);
}
