//! Dashboard wire protocol.
//!
//! Two closed families, both `type`-discriminated JSON:
//!
//! - **[`ClientFrame`]**: inbound frames from a dashboard (`ping`, `ack`,
//!   `data`, `subscribe`, `unsubscribe`).
//! - **[`Envelope`]**: outbound frames. The envelope carries the message id,
//!   timestamp, and retry count; the body is a [`ServerMessage`] flattened
//!   into the same JSON object.
//!
//! Protocol-level bodies (`connected`, `subscribed`, `pong`, `heartbeat`,
//! `error`) are fire-and-forget. Domain notifications are ack-tracked.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::filter::SubscriptionFilter;
use crate::ids::{ConnectionId, MessageId, RestaurantId};

/// Current wall-clock time as epoch milliseconds (wire timestamp format).
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Inbound `type` values accepted from clients.
pub const CLIENT_MESSAGE_TYPES: [&str; 5] = ["ping", "ack", "data", "subscribe", "unsubscribe"];

/// One inbound frame from a dashboard client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Client-assigned frame id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Typed body.
    #[serde(flatten)]
    pub message: ClientMessage,
    /// Client timestamp (epoch ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Inbound message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Application-level liveness ping.
    Ping,
    /// Confirms receipt of an outbound message.
    Ack {
        /// Id of the acknowledged envelope.
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
    /// Opaque client data, surfaced to observers.
    Data {
        /// Arbitrary payload.
        #[serde(default)]
        data: Value,
    },
    /// Replace the connection's subscription filter.
    Subscribe {
        /// New filter; missing means "everything".
        #[serde(default)]
        data: SubscriptionFilter,
    },
    /// Clear the subscription filter.
    Unsubscribe,
}

impl ClientMessage {
    /// Wire `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Ack { .. } => "ack",
            Self::Data { .. } => "data",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Parse one inbound text frame.
///
/// Distinguishes malformed JSON, unknown `type` values, and known types
/// with invalid fields so each can be answered with a precise `error`.
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing string field `type`".to_string()))?
        .to_string();

    if !CLIENT_MESSAGE_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields {
        kind,
        details: e.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Urgency hint for dashboards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Default urgency.
    Normal,
    /// Needs immediate attention.
    High,
}

/// Delivery settings echoed to a client in the `connected` greeting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// How often the server expects traffic.
    pub heartbeat_interval_ms: u64,
    /// How long the server waits for an ack before resending.
    pub message_timeout_ms: u64,
    /// Resends before a message is reported failed.
    pub max_retries: u32,
}

/// Outbound message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Greeting sent once per (re)attached socket.
    Connected {
        /// The logical connection id (use it as `clientId` to resume).
        client_id: ConnectionId,
        /// Scope of the connection.
        restaurant_id: RestaurantId,
        /// Delivery settings.
        config: ClientConfig,
    },
    /// Acknowledges a subscribe/unsubscribe request.
    Subscribed {
        /// Active filter, `null` when cleared.
        filters: Option<SubscriptionFilter>,
    },
    /// Reply to a client `ping`.
    Pong,
    /// Server liveness check.
    Heartbeat,
    /// Protocol error reply.
    Error {
        /// Human-readable message.
        message: String,
        /// Parser detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    /// A ticket changed.
    TicketUpdated {
        /// Ticket document.
        ticket: Value,
        /// Sound hint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sound: Option<String>,
        /// Urgency hint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<Priority>,
    },
    /// A ticket was created.
    NewTicket {
        /// Ticket document.
        ticket: Value,
        /// Sound hint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sound: Option<String>,
        /// Urgency hint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<Priority>,
    },
    /// A ticket is ready for pickup.
    TicketReady {
        /// Ticket document.
        ticket: Value,
        /// Sound hint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sound: Option<String>,
        /// Urgency hint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<Priority>,
    },
    /// Kitchen statistics changed.
    StatsUpdated {
        /// Stats document.
        stats: Value,
    },
    /// Timer tick for one ticket.
    TimerUpdate {
        /// Ticket the timer belongs to.
        ticket_id: String,
        /// Timer document.
        time_data: Value,
    },
    /// Kitchen-wide emergency.
    EmergencyAlert {
        /// Alert document.
        alert: Value,
        /// Always `high`.
        priority: Priority,
        /// Always `emergency_alert`.
        sound: String,
    },
}

impl ServerMessage {
    /// Build a protocol error body.
    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            details,
        }
    }

    /// Closed message type of this body.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Connected { .. } => MessageType::Connected,
            Self::Subscribed { .. } => MessageType::Subscribed,
            Self::Pong => MessageType::Pong,
            Self::Heartbeat => MessageType::Heartbeat,
            Self::Error { .. } => MessageType::Error,
            Self::TicketUpdated { .. } => MessageType::TicketUpdated,
            Self::NewTicket { .. } => MessageType::NewTicket,
            Self::TicketReady { .. } => MessageType::TicketReady,
            Self::StatsUpdated { .. } => MessageType::StatsUpdated,
            Self::TimerUpdate { .. } => MessageType::TimerUpdate,
            Self::EmergencyAlert { .. } => MessageType::EmergencyAlert,
        }
    }

    /// Ticket document carried by this body, if any.
    pub fn ticket(&self) -> Option<&Value> {
        match self {
            Self::TicketUpdated { ticket, .. }
            | Self::NewTicket { ticket, .. }
            | Self::TicketReady { ticket, .. } => Some(ticket),
            _ => None,
        }
    }

    /// Ticket id carried by this body: the ticket's `id` or an explicit `ticketId`.
    pub fn ticket_id(&self) -> Option<String> {
        match self {
            Self::TimerUpdate { ticket_id, .. } => Some(ticket_id.clone()),
            _ => self
                .ticket()
                .and_then(|t| t.get("id").or_else(|| t.get("ticketId")))
                .and_then(value_as_key),
        }
    }
}

/// Closed set of outbound message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// `connected`
    Connected,
    /// `subscribed`
    Subscribed,
    /// `pong`
    Pong,
    /// `heartbeat`
    Heartbeat,
    /// `error`
    Error,
    /// `ticket_updated`
    TicketUpdated,
    /// `new_ticket`
    NewTicket,
    /// `ticket_ready`
    TicketReady,
    /// `stats_updated`
    StatsUpdated,
    /// `timer_update`
    TimerUpdate,
    /// `emergency_alert`
    EmergencyAlert,
}

impl MessageType {
    /// Wire `type` string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Pong => "pong",
            Self::Heartbeat => "heartbeat",
            Self::Error => "error",
            Self::TicketUpdated => "ticket_updated",
            Self::NewTicket => "new_ticket",
            Self::TicketReady => "ticket_ready",
            Self::StatsUpdated => "stats_updated",
            Self::TimerUpdate => "timer_update",
            Self::EmergencyAlert => "emergency_alert",
        }
    }

    /// Protocol-level types are written directly and never ack-tracked.
    pub fn is_protocol(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Subscribed | Self::Pong | Self::Heartbeat | Self::Error
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique message id (ack key).
    pub id: MessageId,
    /// Typed body, flattened next to the envelope fields.
    #[serde(flatten)]
    pub body: ServerMessage,
    /// Creation time (epoch ms).
    pub timestamp: i64,
    /// How many times this message has been resent.
    #[serde(default)]
    pub retry_count: u32,
}

impl Envelope {
    /// Wrap a body in a fresh envelope.
    pub fn new(body: ServerMessage) -> Self {
        Self {
            id: MessageId::generate(),
            body,
            timestamp: now_millis(),
            retry_count: 0,
        }
    }

    /// Closed message type of the body.
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    /// The same message (same id and body) marked as one more resend.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    /// Serialize to the JSON text written on the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Normalize a JSON scalar used as a filter key (strings as-is, numbers stringified).
pub fn value_as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn parse_ping() {
        let frame = parse_client_frame(r#"{"id":"f1","type":"ping","timestamp":1}"#).unwrap();
        assert_eq!(frame.message, ClientMessage::Ping);
        assert_eq!(frame.id.as_deref(), Some("f1"));
        assert_eq!(frame.timestamp, Some(1));
    }

    #[test]
    fn parse_ack_reads_top_level_message_id() {
        let frame =
            parse_client_frame(r#"{"id":"f2","type":"ack","messageId":"m-9","timestamp":5}"#)
                .unwrap();
        assert_matches!(frame.message, ClientMessage::Ack { message_id } if message_id.as_str() == "m-9");
    }

    #[test]
    fn parse_subscribe_with_filters() {
        let frame = parse_client_frame(
            r#"{"type":"subscribe","data":{"statuses":["FIRED"],"ticketIds":["t1"]}}"#,
        )
        .unwrap();
        let ClientMessage::Subscribe { data } = frame.message else {
            panic!("expected subscribe");
        };
        assert!(data.statuses.unwrap().contains("FIRED"));
        assert!(data.ticket_ids.unwrap().contains("t1"));
        assert!(data.stations.is_none());
    }

    #[test]
    fn parse_subscribe_without_data_is_empty_filter() {
        let frame = parse_client_frame(r#"{"type":"subscribe"}"#).unwrap();
        assert_matches!(frame.message, ClientMessage::Subscribe { data } if data.is_empty());
    }

    #[test]
    fn ping_ignores_extra_fields() {
        let frame = parse_client_frame(r#"{"type":"ping","data":{"x":1}}"#).unwrap();
        assert_eq!(frame.message.kind(), "ping");
    }

    #[test]
    fn malformed_json_is_reported() {
        assert_matches!(parse_client_frame("{not json"), Err(ProtocolError::Malformed(_)));
        assert_matches!(parse_client_frame("[1,2]"), Err(ProtocolError::Malformed(_)));
        assert_matches!(parse_client_frame(r#"{"type":7}"#), Err(ProtocolError::Malformed(_)));
    }

    #[test]
    fn unknown_type_is_reported() {
        assert_matches!(
            parse_client_frame(r#"{"type":"shout"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "shout"
        );
    }

    #[test]
    fn ack_without_message_id_is_invalid() {
        assert_matches!(
            parse_client_frame(r#"{"type":"ack"}"#),
            Err(ProtocolError::InvalidFields { kind, .. }) if kind == "ack"
        );
    }

    #[test]
    fn envelope_flattens_body() {
        let env = Envelope::new(ServerMessage::TicketReady {
            ticket: json!({"id": "t1", "status": "READY"}),
            sound: Some("ticket_ready".into()),
            priority: Some(Priority::High),
        });
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "ticket_ready");
        assert_eq!(value["ticket"]["id"], "t1");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["id"], env.id.as_str());
        assert_eq!(value["retryCount"], 0);
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn connected_fields_are_camel_case() {
        let env = Envelope::new(ServerMessage::Connected {
            client_id: ConnectionId::new("c1"),
            restaurant_id: RestaurantId::new("r1"),
            config: ClientConfig {
                heartbeat_interval_ms: 30_000,
                message_timeout_ms: 10_000,
                max_retries: 3,
            },
        });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["clientId"], "c1");
        assert_eq!(value["restaurantId"], "r1");
        assert_eq!(value["config"]["heartbeatIntervalMs"], 30_000);
    }

    #[test]
    fn timer_update_fields_are_camel_case() {
        let body = ServerMessage::TimerUpdate {
            ticket_id: "t7".into(),
            time_data: json!({"elapsed": 90}),
        };
        let value = serde_json::to_value(Envelope::new(body)).unwrap();
        assert_eq!(value["ticketId"], "t7");
        assert_eq!(value["timeData"]["elapsed"], 90);
    }

    #[test]
    fn unit_bodies_serialize_with_type_only() {
        let value = serde_json::to_value(Envelope::new(ServerMessage::Pong)).unwrap();
        assert_eq!(value["type"], "pong");
    }

    #[test]
    fn next_attempt_keeps_id() {
        let env = Envelope::new(ServerMessage::StatsUpdated { stats: json!({}) });
        let retry = env.next_attempt();
        assert_eq!(retry.id, env.id);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.body, env.body);
    }

    #[test]
    fn ticket_id_from_ticket_or_timer() {
        let numeric = ServerMessage::NewTicket {
            ticket: json!({"id": 12}),
            sound: None,
            priority: None,
        };
        assert_eq!(numeric.ticket_id().as_deref(), Some("12"));

        let timer = ServerMessage::TimerUpdate {
            ticket_id: "t2".into(),
            time_data: Value::Null,
        };
        assert_eq!(timer.ticket_id().as_deref(), Some("t2"));
        assert_eq!(ServerMessage::Pong.ticket_id(), None);
    }

    #[test]
    fn protocol_types() {
        assert!(MessageType::Pong.is_protocol());
        assert!(MessageType::Heartbeat.is_protocol());
        assert!(!MessageType::TicketUpdated.is_protocol());
        assert!(!MessageType::EmergencyAlert.is_protocol());
    }
}
