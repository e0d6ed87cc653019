//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything is recorded. The handle renders
/// `GET /metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render the Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants.

/// Logical connections created (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections removed from the registry (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Lifetime of a logical connection in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Envelopes written to a socket, retries included (counter, labels: type).
pub const NOTIFY_MESSAGES_SENT_TOTAL: &str = "notify_messages_sent_total";
/// Envelopes parked in an outbound queue (counter).
pub const NOTIFY_MESSAGES_QUEUED_TOTAL: &str = "notify_messages_queued_total";
/// Envelopes rejected by a full queue (counter).
pub const NOTIFY_MESSAGES_DROPPED_TOTAL: &str = "notify_messages_dropped_total";
/// Ack-timeout resends (counter).
pub const NOTIFY_MESSAGE_RETRIES_TOTAL: &str = "notify_message_retries_total";
/// Envelopes that exhausted their retries (counter).
pub const NOTIFY_MESSAGES_FAILED_TOTAL: &str = "notify_messages_failed_total";
/// Acks matched to a pending envelope (counter).
pub const NOTIFY_ACKS_TOTAL: &str = "notify_acks_total";
/// Lifecycle transitions (counter, labels: to).
pub const NOTIFY_STATE_TRANSITIONS_TOTAL: &str = "notify_state_transitions_total";
/// Connections that missed the heartbeat timeout (counter).
pub const NOTIFY_HEARTBEAT_TIMEOUTS_TOTAL: &str = "notify_heartbeat_timeouts_total";
/// Recipients per restaurant broadcast (histogram).
pub const NOTIFY_BROADCAST_RECIPIENTS: &str = "notify_broadcast_recipients";
