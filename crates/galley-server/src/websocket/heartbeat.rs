//! Heartbeat liveness sweep.
//!
//! One pass over the registry per tick (every `heartbeat_interval / 2`):
//! connections silent for longer than the timeout are moved out of
//! `CONNECTED`, connections silent for longer than the interval get a heartbeat,
//! and connections that reached `FAILED` are released.

use std::sync::Arc;
use std::time::Duration;

use galley_core::events::DisconnectReason;
use galley_core::protocol::ServerMessage;
use galley_core::state::ConnectionState;
use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::dispatcher::Dispatcher;
use super::lifecycle::Trigger;
use super::registry::ConnectionRegistry;
use crate::metrics::NOTIFY_HEARTBEAT_TIMEOUTS_TOTAL;

/// Counts from one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Heartbeat envelopes written.
    pub heartbeats_sent: usize,
    /// Connections that missed the timeout on this pass.
    pub timed_out: usize,
    /// `FAILED` connections removed from the registry.
    pub purged: usize,
}

/// Periodic liveness check over every registered connection.
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    /// Monitor probing after `interval` of silence and timing out after `timeout`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            interval,
            timeout,
        }
    }

    /// Run one sweep at `now`.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut failed = Vec::new();

        for conn in self.registry.all() {
            let mut inner = conn.lock();
            if inner.state == ConnectionState::Connected {
                let elapsed = now.saturating_duration_since(inner.last_heartbeat);
                if elapsed > self.timeout {
                    warn!(
                        connection_id = %conn.id,
                        restaurant_id = %conn.restaurant_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "heartbeat timeout"
                    );
                    counter!(NOTIFY_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                    let _ = self
                        .dispatcher
                        .transition_locked(&conn, &mut inner, Trigger::HeartbeatTimeout, now);
                    report.timed_out += 1;
                } else if elapsed > self.interval
                    && self
                        .dispatcher
                        .send_protocol_locked(&conn, &mut inner, ServerMessage::Heartbeat, now)
                {
                    report.heartbeats_sent += 1;
                }
            }
            if inner.state.is_terminal() {
                failed.push(conn.id.clone());
            }
        }

        for id in failed {
            if self.dispatcher.release(&id, DisconnectReason::Failed, now).is_some() {
                report.purged += 1;
            }
        }

        if report != SweepReport::default() {
            debug!(
                heartbeats_sent = report.heartbeats_sent,
                timed_out = report.timed_out,
                purged = report.purged,
                "heartbeat sweep"
            );
        }
        report
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
