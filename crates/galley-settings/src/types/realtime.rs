//! Notification delivery settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Heartbeat, ack/retry, queue, and reconnection tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Silence after which the server sends a heartbeat.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is considered dead.
    pub heartbeat_timeout_ms: u64,
    /// How long to wait for an ack before resending.
    pub message_timeout_ms: u64,
    /// Resends before a message is reported failed.
    pub max_retries: u32,
    /// Outbound queue capacity per connection.
    pub max_queue_size: usize,
    /// Base reconnection delay (scaled linearly by attempt).
    pub reconnect_delay_ms: u64,
    /// Reconnection attempts before a connection fails.
    pub reconnect_max_attempts: u32,
    /// Cadence of the ack-deadline and reconnect check.
    pub ack_check_interval_ms: u64,
    /// Frames buffered between a connection and its socket writer.
    pub transport_buffer_size: usize,
    /// Capacity of the observer event channel.
    pub event_channel_capacity: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            message_timeout_ms: 10_000,
            max_retries: 3,
            max_queue_size: 100,
            reconnect_delay_ms: 1_000,
            reconnect_max_attempts: 5,
            ack_check_interval_ms: 1_000,
            transport_buffer_size: 256,
            event_channel_capacity: 1024,
        }
    }
}

impl RealtimeSettings {
    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Sweep period: half the heartbeat interval.
    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis((self.heartbeat_interval_ms / 2).max(1))
    }

    /// Ack deadline per write.
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    /// Base reconnection delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Ack/reconnect check cadence.
    pub fn ack_check_interval(&self) -> Duration {
        Duration::from_millis(self.ack_check_interval_ms)
    }
}
