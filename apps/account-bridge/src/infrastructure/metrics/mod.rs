//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Push**: messages delivered to clients by type
//! - **Relay**: messages sent/dropped on the risk relay, reconnects
//! - **Sessions**: active monitored clients
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "account_bridge_push_messages_total",
        "Messages delivered to push clients by type"
    );
    describe_counter!(
        "account_bridge_relay_messages_sent_total",
        "Messages delivered to the risk relay by type"
    );
    describe_counter!(
        "account_bridge_relay_messages_dropped_total",
        "Messages dropped because the risk relay was not connected"
    );
    describe_counter!(
        "account_bridge_relay_reconnects_total",
        "Risk relay reconnection attempts"
    );
    describe_gauge!(
        "account_bridge_active_sessions",
        "Clients with a live monitor task set"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a message delivered to a push client.
pub fn record_push_message(kind: &'static str) {
    counter!("account_bridge_push_messages_total", "type" => kind).increment(1);
}

/// Record a message delivered to the risk relay.
pub fn record_relay_sent(kind: &'static str) {
    counter!("account_bridge_relay_messages_sent_total", "type" => kind).increment(1);
}

/// Record a message dropped because the relay was unavailable.
pub fn record_relay_drop(kind: &'static str) {
    counter!("account_bridge_relay_messages_dropped_total", "type" => kind).increment(1);
}

/// Record a relay reconnection attempt.
pub fn record_relay_reconnect() {
    counter!("account_bridge_relay_reconnects_total").increment(1);
}

/// Update the active session gauge.
pub fn set_active_sessions(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("account_bridge_active_sessions").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        // The global recorder may not be installed in unit tests; recording
        // must still be safe to call.
        record_push_message("BALANCE_UPDATE");
        record_relay_sent("RISK_ALERT");
        record_relay_drop("RISK_ALERT");
        record_relay_reconnect();
        set_active_sessions(3);
    }
}
