//! Connection lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a dashboard connection.
///
/// `Failed` is terminal: a failed connection is purged on the next heartbeat
/// sweep and is never resurrected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Socket accepted, not yet registered and greeted.
    Connecting,
    /// Registered, greeted, and considered live.
    Connected,
    /// Lost the transport; awaiting a client reconnect.
    Reconnecting,
    /// Liveness lost or explicitly closed.
    Disconnected,
    /// Reconnection attempts exhausted.
    Failed,
}

impl ConnectionState {
    /// Wire/log representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Disconnected => "DISCONNECTED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether messages can be written to the transport right now.
    pub fn is_deliverable(self) -> bool {
        self == Self::Connected
    }

    /// States from which a returning client may resume the same logical connection.
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Disconnected | Self::Reconnecting)
    }

    /// Terminal state.
    pub fn is_terminal(self) -> bool {
        self == Self::Failed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
