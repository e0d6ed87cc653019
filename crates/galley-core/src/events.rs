//! Observable notifier events.
//!
//! Lifecycle and delivery outcomes are reported as a closed set of typed
//! variants rather than thrown. Observers receive them over a broadcast
//! channel and match exhaustively.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ConnectionId, MessageId, RestaurantId};
use crate::protocol::MessageType;
use crate::state::ConnectionState;

/// Why a connection left the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The dashboard sent a close frame.
    ClientClosed,
    /// The server closed it explicitly.
    ServerClosed,
    /// Reconnection attempts were exhausted and the sweep purged it.
    Failed,
    /// The service shut down.
    Shutdown,
}

impl DisconnectReason {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ServerClosed => "server_closed",
            Self::Failed => "failed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Events emitted by the notification service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierEvent {
    /// A new logical connection was registered and greeted.
    ClientConnected {
        /// Connection.
        connection_id: ConnectionId,
        /// Its restaurant.
        restaurant_id: RestaurantId,
    },
    /// A returning dashboard reattached to an existing logical connection.
    ClientResumed {
        /// Connection.
        connection_id: ConnectionId,
        /// Its restaurant.
        restaurant_id: RestaurantId,
    },
    /// A connection was removed from the registry.
    ClientDisconnected {
        /// Connection.
        connection_id: ConnectionId,
        /// Its restaurant.
        restaurant_id: RestaurantId,
        /// Why.
        reason: DisconnectReason,
    },
    /// A lifecycle transition.
    StateChanged {
        /// Connection.
        connection_id: ConnectionId,
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// Reconnection bookkeeping was scheduled.
    ReconnectScheduled {
        /// Connection.
        connection_id: ConnectionId,
        /// Attempt number (1-based).
        attempt: u32,
        /// Delay until the attempt is due.
        delay_ms: u64,
    },
    /// A message exhausted its retries without an ack.
    MessageFailed {
        /// Connection.
        connection_id: ConnectionId,
        /// Failed message.
        message_id: MessageId,
        /// Its type.
        message_type: MessageType,
        /// Total write attempts (first send plus retries).
        attempts: u32,
    },
    /// A message was rejected because the outbound queue was full.
    MessageDropped {
        /// Connection.
        connection_id: ConnectionId,
        /// Dropped message type.
        message_type: MessageType,
        /// Queue length at the time of the drop.
        queue_len: usize,
    },
    /// Opaque `data` frame from a dashboard.
    ClientData {
        /// Connection.
        connection_id: ConnectionId,
        /// Payload.
        data: Value,
    },
}

impl NotifierEvent {
    /// Connection the event concerns.
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Self::ClientConnected { connection_id, .. }
            | Self::ClientResumed { connection_id, .. }
            | Self::ClientDisconnected { connection_id, .. }
            | Self::StateChanged { connection_id, .. }
            | Self::ReconnectScheduled { connection_id, .. }
            | Self::MessageFailed { connection_id, .. }
            | Self::MessageDropped { connection_id, .. }
            | Self::ClientData { connection_id, .. } => connection_id,
        }
    }

    /// Stable event name for logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ClientConnected { .. } => "client_connected",
            Self::ClientResumed { .. } => "client_resumed",
            Self::ClientDisconnected { .. } => "client_disconnected",
            Self::StateChanged { .. } => "state_changed",
            Self::ReconnectScheduled { .. } => "reconnect_scheduled",
            Self::MessageFailed { .. } => "message_failed",
            Self::MessageDropped { .. } => "message_dropped",
            Self::ClientData { .. } => "client_data",
        }
    }
}
