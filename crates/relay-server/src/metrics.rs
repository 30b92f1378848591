//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_relay_core::{CleanupReport, HeartbeatReport};
use tracing::info;

/// Metric names.
pub mod names {
    pub const HANDSHAKES_TOTAL: &str = "relay_handshakes_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const DISCONNECTS_TOTAL: &str = "relay_disconnects_total";
    pub const POLLS_TOTAL: &str = "relay_polls_total";
    pub const POLL_SECONDS: &str = "relay_poll_seconds";
    pub const PAYLOAD_BYTES: &str = "relay_payload_bytes";
    pub const PACKETS_RECEIVED: &str = "relay_packets_received_total";
    pub const EVENTS_TOTAL: &str = "relay_events_total";
    pub const HEARTBEAT_SWEEPS: &str = "relay_heartbeat_sweeps_total";
    pub const HEARTBEAT_REACHED: &str = "relay_heartbeat_reached";
    pub const CLEANUP_REMOVED: &str = "relay_cleanup_removed_total";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::HANDSHAKES_TOTAL, "Total number of handshakes");
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Connected sessions seen by the last heartbeat"
    );
    metrics::describe_counter!(names::DISCONNECTS_TOTAL, "Total number of disconnects");
    metrics::describe_counter!(names::POLLS_TOTAL, "Total number of long-poll requests");
    metrics::describe_histogram!(names::POLL_SECONDS, "Time a long-poll request was held");
    metrics::describe_counter!(names::PAYLOAD_BYTES, "Payload bytes by direction");
    metrics::describe_counter!(
        names::PACKETS_RECEIVED,
        "Engine.IO packets received from clients"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Socket.IO events routed, by name");
    metrics::describe_counter!(names::HEARTBEAT_SWEEPS, "Heartbeat sweeps run");
    metrics::describe_gauge!(
        names::HEARTBEAT_REACHED,
        "Connections reached by the last heartbeat"
    );
    metrics::describe_counter!(names::CLEANUP_REMOVED, "Records removed by sweeps");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

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

/// Record a completed handshake.
pub fn record_handshake() {
    counter!(names::HANDSHAKES_TOTAL).increment(1);
}

/// Record a disconnect.
pub fn record_disconnect(reason: &str) {
    counter!(names::DISCONNECTS_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Record a finished poll and how long it was held.
pub fn record_poll(seconds: f64) {
    counter!(names::POLLS_TOTAL).increment(1);
    histogram!(names::POLL_SECONDS).record(seconds);
}

/// Record payload bytes.
pub fn record_bytes(bytes: usize, direction: &str) {
    counter!(names::PAYLOAD_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Record packets handled from a POST body.
pub fn record_packets_received(count: usize) {
    counter!(names::PACKETS_RECEIVED).increment(count as u64);
}

/// Record a routed Socket.IO event.
pub fn record_event(event: &str) {
    counter!(names::EVENTS_TOTAL, "event" => event.to_string()).increment(1);
}

/// Record a heartbeat sweep.
pub fn record_heartbeat(report: &HeartbeatReport) {
    counter!(names::HEARTBEAT_SWEEPS).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).set(report.checked.saturating_sub(report.disconnected) as f64);
    gauge!(names::HEARTBEAT_REACHED).set(report.reached as f64);
    for (reason, count) in disconnect_reasons(report) {
        counter!(names::DISCONNECTS_TOTAL, "reason" => reason).increment(count);
    }
    counter!(names::CLEANUP_REMOVED, "kind" => "queue_entry").increment(report.queue_evicted as u64);
}

/// Non-zero heartbeat disconnect counts, labelled by fault.
fn disconnect_reasons(report: &HeartbeatReport) -> Vec<(&'static str, u64)> {
    report
        .faults()
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(fault, count)| (fault.kind(), count as u64))
        .collect()
}

/// Record a cleanup sweep.
pub fn record_cleanup(report: &CleanupReport) {
    counter!(names::CLEANUP_REMOVED, "kind" => "delivery").increment(report.deliveries_removed as u64);
    counter!(names::CLEANUP_REMOVED, "kind" => "connection")
        .increment(report.connections_removed as u64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}
