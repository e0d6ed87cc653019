//! Error types for the notification layer.
//!
//! - [`NotifyError`]: failures surfaced by notifier operations
//! - [`TransportError`]: a single socket write that could not be performed
//! - [`ProtocolError`]: an inbound frame that could not be interpreted

use thiserror::Error;

use crate::ids::ConnectionId;
use crate::protocol::ServerMessage;
use crate::state::ConnectionState;

/// Errors returned by notifier operations.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A connection with this id is already registered.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    /// No connection with this id.
    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    /// The connection is in a state that rejects new messages.
    #[error("connection {id} is {state}")]
    ConnectionFailed {
        /// Target connection.
        id: ConnectionId,
        /// Its current state.
        state: ConnectionState,
    },

    /// Socket write failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Envelope could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The service is shutting down.
    #[error("notification service is shutting down")]
    ShuttingDown,
}

/// A failed write to one connection's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The socket is gone.
    #[error("transport closed")]
    Closed,
    /// The outbound buffer is full.
    #[error("transport outbound buffer full")]
    Backpressure,
}

/// An inbound frame the server could not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Not JSON, or missing a string `type`.
    #[error("Invalid message format")]
    Malformed(String),
    /// `type` is not one the server understands.
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    /// Known `type` with missing or ill-typed fields.
    #[error("Invalid {kind} message")]
    InvalidFields {
        /// The frame's `type`.
        kind: String,
        /// Parser detail.
        details: String,
    },
}

impl ProtocolError {
    /// `error` reply body sent back to the client.
    pub fn to_reply(&self) -> ServerMessage {
        let details = match self {
            Self::Malformed(detail) => Some(detail.clone()),
            Self::UnknownType(_) => None,
            Self::InvalidFields { details, .. } => Some(details.clone()),
        };
        ServerMessage::error(self.to_string(), details)
    }
}
