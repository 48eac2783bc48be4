//! Metrics collection and export for Switchboard.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use switchboard_core::RouterStats;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "switchboard_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "switchboard_connections_active";
    pub const EVENTS_TOTAL: &str = "switchboard_events_total";
    pub const OPERATORS_BOUND: &str = "switchboard_operators_bound";
    pub const DEVICES_BOUND: &str = "switchboard_devices_bound";
    pub const DELIVERIES_DROPPED: &str = "switchboard_deliveries_dropped_total";
    pub const DISPATCH_SECONDS: &str = "switchboard_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "switchboard_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::EVENTS_TOTAL,
        "Events processed, by event name and direction"
    );
    metrics::describe_gauge!(names::OPERATORS_BOUND, "Current operator bindings");
    metrics::describe_gauge!(names::DEVICES_BOUND, "Current device bindings");
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED,
        "Outbound events dropped because a connection's queue was full"
    );
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Inbound event dispatch latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors, by kind");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an event crossing the wire.
pub fn record_event(event: &'static str, direction: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => event, "direction" => direction).increment(1);
}

/// Record dispatch latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Publish binding gauges and the dropped-delivery count.
pub fn record_router_stats(stats: &RouterStats) {
    gauge!(names::OPERATORS_BOUND).set(stats.operator_count as f64);
    gauge!(names::DEVICES_BOUND).set(stats.device_count as f64);
    counter!(names::DELIVERIES_DROPPED).absolute(stats.dropped_deliveries);
}

/// Record an error.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
