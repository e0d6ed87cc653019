//! Settings type definitions.
//!
//! Every section is `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file only needs the keys it changes.

mod realtime;
mod server;

pub use realtime::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings for the Galley notifier.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "realtime": { "maxQueueSize": 250 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GalleySettings {
    /// Settings schema version.
    pub version: String,
    /// Listener settings.
    pub server: ServerSettings,
    /// Delivery tuning.
    pub realtime: RealtimeSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for GalleySettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            realtime: RealtimeSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl GalleySettings {
    /// Correct invalid invariants in place.
    ///
    /// Called during loading. Bad values are corrected with a warning
    /// rather than rejected.
    pub fn validate(&mut self) {
        let rt = &mut self.realtime;
        let defaults = RealtimeSettings::default();

        for (name, value, fallback) in [
            ("heartbeat_interval_ms", &mut rt.heartbeat_interval_ms, defaults.heartbeat_interval_ms),
            ("message_timeout_ms", &mut rt.message_timeout_ms, defaults.message_timeout_ms),
            ("ack_check_interval_ms", &mut rt.ack_check_interval_ms, defaults.ack_check_interval_ms),
        ] {
            if *value == 0 {
                tracing::warn!(setting = name, fallback, "zero interval, using default");
                *value = fallback;
            }
        }

        if rt.heartbeat_timeout_ms <= rt.heartbeat_interval_ms {
            let corrected = rt.heartbeat_interval_ms.saturating_mul(2);
            tracing::warn!(
                timeout_ms = rt.heartbeat_timeout_ms,
                interval_ms = rt.heartbeat_interval_ms,
                corrected,
                "heartbeat timeout must exceed interval, correcting"
            );
            rt.heartbeat_timeout_ms = corrected;
        }
        if rt.max_queue_size == 0 {
            tracing::warn!("max_queue_size is 0, using 1");
            rt.max_queue_size = 1;
        }
        if rt.reconnect_max_attempts == 0 {
            tracing::warn!("reconnect_max_attempts is 0, using 1");
            rt.reconnect_max_attempts = 1;
        }
        if rt.transport_buffer_size == 0 {
            rt.transport_buffer_size = defaults.transport_buffer_size;
        }
        if rt.event_channel_capacity == 0 {
            rt.event_channel_capacity = defaults.event_channel_capacity;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
