//! Prometheus recorder for the client metrics
//!
//! The client crate only emits through the `metrics` facade; installing a
//! recorder here turns those calls into a renderable Prometheus snapshot.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Install the global recorder. Request durations render as a histogram.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("ops_request_duration_seconds".to_string()),
            ops_client::metrics::DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}
