//! Metrics collection and export for Chatline.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use chatline_core::{RelayOutcome, RelayReport};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chatline_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chatline_connections_active";
    pub const MESSAGES_TOTAL: &str = "chatline_messages_total";
    pub const RELAYS_TOTAL: &str = "chatline_relays_total";
    pub const RELAY_DURATION_SECONDS: &str = "chatline_relay_duration_seconds";
    pub const ERRORS_TOTAL: &str = "chatline_errors_total";
    pub const SESSIONS_ISSUED: &str = "chatline_sessions_issued_total";
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
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages relayed");
    metrics::describe_counter!(names::RELAYS_TOTAL, "Finished relays by outcome");
    metrics::describe_histogram!(
        names::RELAY_DURATION_SECONDS,
        "Connection lifetime in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Relay errors by category");
    metrics::describe_counter!(names::SESSIONS_ISSUED, "Sessions created");

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

/// Record a finished relay.
pub fn record_relay(report: &RelayReport, seconds: f64) {
    let outcome = match &report.outcome {
        RelayOutcome::Closed => "closed",
        RelayOutcome::Errored(_) => "errored",
        RelayOutcome::Shutdown => "shutdown",
    };
    counter!(names::RELAYS_TOTAL, "outcome" => outcome).increment(1);
    counter!(names::MESSAGES_TOTAL, "direction" => "inbound").increment(report.messages_in);
    counter!(names::MESSAGES_TOTAL, "direction" => "outbound").increment(report.messages_out);
    histogram!(names::RELAY_DURATION_SECONDS).record(seconds);

    if let Some(e) = report.outcome.error() {
        counter!(names::ERRORS_TOTAL, "category" => e.category()).increment(1);
    }
}

/// Record a newly issued session.
pub fn record_session() {
    counter!(names::SESSIONS_ISSUED).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
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
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
