//! Prometheus exporter for the host process.

use std::net::SocketAddr;

use metrics::counter;

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics(port: u16) {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)));
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a message read from the bus.
pub fn message_received(kind: &str) {
    counter!("tide_bus_messages_total", "kind" => kind.to_string()).increment(1);
}

/// Record a message the engine rejected.
pub fn message_failed(kind: &str) {
    counter!("tide_bus_failures_total", "kind" => kind.to_string()).increment(1);
}
