//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, endpoint
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_endpoint_effective_weight` (gauge): weight used for selection
//! - `proxy_endpoint_fail_rate` (gauge): failure ratio seen by the controller
//! - `proxy_controller_transitions_total` (counter): FSM transitions by from/to
//! - `proxy_rate_limited_total` (counter): rejected requests by mapper

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape listener.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, endpoint: &str, start: Instant) {
    let status = status.to_string();
    ::metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.clone(),
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
    ::metrics::histogram!(
        "proxy_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_endpoint_state(endpoint: &str, effective_weight: u32, fail_rate: f64) {
    ::metrics::gauge!("proxy_endpoint_effective_weight", "endpoint" => endpoint.to_string())
        .set(f64::from(effective_weight));
    ::metrics::gauge!("proxy_endpoint_fail_rate", "endpoint" => endpoint.to_string()).set(fail_rate);
}

pub fn record_controller_transition(from: &'static str, to: &'static str) {
    ::metrics::counter!("proxy_controller_transitions_total", "from" => from, "to" => to).increment(1);
}

pub fn record_rate_limited(mapper: &'static str) {
    ::metrics::counter!("proxy_rate_limited_total", "mapper" => mapper).increment(1);
}
