//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_accepted_total` (counter): accepted connections by protocol
//! - `proxy_connections_rejected_total` (counter): admission rejections by reason
//! - `proxy_active_connections` (gauge): connections holding an admission token
//! - `proxy_requests_total` (counter): finished requests by kind, status
//! - `proxy_request_duration_seconds` (histogram): connection lifetime by kind
//! - `proxy_bytes_transferred_total` (counter): bytes delivered to clients by kind
//! - `proxy_upstream_dial_failures_total` (counter)
//!
//! Without an installed recorder every call below is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accepted(protocol: &'static str) {
    metrics::counter!("proxy_connections_accepted_total", "protocol" => protocol).increment(1);
}

pub fn record_rejected(reason: &'static str) {
    metrics::counter!("proxy_connections_rejected_total", "reason" => reason).increment(1);
}

pub fn connection_opened() {
    metrics::gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!("proxy_active_connections").decrement(1.0);
}

pub fn record_request(kind: &'static str, status: u16, bytes: u64, elapsed: Duration) {
    metrics::counter!("proxy_requests_total", "kind" => kind, "status" => status.to_string())
        .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "kind" => kind)
        .record(elapsed.as_secs_f64());
    metrics::counter!("proxy_bytes_transferred_total", "kind" => kind).increment(bytes);
}

pub fn record_dial_failure() {
    metrics::counter!("proxy_upstream_dial_failures_total").increment(1);
}
