//! Exporter self-metrics.
//!
//! These describe the exporter itself, not the node it watches, and are
//! recorded through the `metrics` facade. They are rendered by
//! `metrics-exporter-prometheus` and appended to `/metrics` after the node
//! instruments.
//!
//! All names carry the `exporter_` prefix; counters end in `_total` and
//! duration histograms in `_seconds`.
//!
//! # Cardinality
//!
//! - `service`: 6 values (watched services) plus `unknown`
//! - `reason`: `decode_failure`, `unroutable`
//! - `operation`: secondary RPC methods (2 values)
//! - `status`: `success` or an `RpcError` label (6 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Drop reason: payload did not decode into the command's type.
pub const REASON_DECODE_FAILURE: &str = "decode_failure";

/// Drop reason: origin matched no watched service.
pub const REASON_UNROUTABLE: &str = "unroutable";

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any self-metric is recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Secondary requests are bulk fetches against a local node; anything
        // past the request timeout shows up as a timeout status instead.
        .set_buckets_for_metric(
            Matcher::Prefix("exporter_secondary_request".to_string()),
            &[
                0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set secondary request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Record one event routed to a service handler.
///
/// Metric: `exporter_events_received_total`
/// Labels: `service`
pub fn record_event_received(service: &str) {
    counter!("exporter_events_received_total", "service" => service.to_string()).increment(1);
}

/// Record one event dropped before it could change any instrument.
///
/// Metric: `exporter_events_dropped_total`
/// Labels: `service`, `reason`
pub fn record_event_dropped(service: &str, reason: &'static str) {
    counter!(
        "exporter_events_dropped_total",
        "service" => service.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// Record the outcome and duration of a secondary (HTTP) request.
///
/// Metric: `exporter_secondary_request_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_secondary_request(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!(
        "exporter_secondary_request_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// Set whether the daemon session is up.
///
/// Metric: `exporter_daemon_connected`
pub fn set_daemon_connected(connected: bool) {
    gauge!("exporter_daemon_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record one successful reconnect after a dropped session.
///
/// Metric: `exporter_daemon_reconnects_total`
pub fn record_daemon_reconnect() {
    counter!("exporter_daemon_reconnects_total").increment(1);
}

/// Record one crawler address that could not be mapped to a country.
///
/// Metric: `exporter_geo_lookup_misses_total`
pub fn record_geo_lookup_miss() {
    counter!("exporter_geo_lookup_misses_total").increment(1);
}
