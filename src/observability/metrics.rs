//! Metrics collection and exposition.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::manager::frames::Decision;

/// Initialize metrics exporter and server.
pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus recorder");

    tracing::info!("Metrics server listening on http://{}", addr);
}

/// Record a proxied client request and its final status.
pub fn record_request(method: &str, status: u16) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("relay_requests_total", &labels).increment(1);
}

/// Record a manager decision for one review RPC.
pub fn record_review(kind: &str, decision: &Decision) {
    let action = if decision.is_reject() { "reject" } else { "accept" };
    let labels = [("kind", kind.to_string()), ("action", action.to_string())];
    counter!("relay_reviews_total", &labels).increment(1);
}

/// Update the manager-connected gauge.
pub fn record_manager_connected(connected: bool) {
    let val = if connected { 1.0 } else { 0.0 };
    gauge!("relay_manager_connected").set(val);
}

/// Record bytes moved through a CONNECT tunnel.
pub fn record_tunnel_bytes(direction: &'static str, count: usize) {
    counter!("relay_tunnel_bytes_total", "direction" => direction).increment(count as u64);
}

/// Record a rejected manager upgrade attempt.
pub fn record_auth_failure() {
    counter!("relay_manager_auth_failures_total").increment(1);
}

/// Record an inbound control frame that failed to decode.
pub fn record_frame_decode_error() {
    counter!("relay_frame_decode_errors_total").increment(1);
}
