//! Inbound frame dispatch: parses a dashboard frame and applies it to its
//! connection.

use galley_core::errors::ProtocolError;
use galley_core::events::NotifierEvent;
use galley_core::protocol::{ClientMessage, ServerMessage, parse_client_frame};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::connection::ClientConnection;
use super::dispatcher::Dispatcher;
use super::emitter::EventEmitter;

/// Handle one inbound text frame.
///
/// Any frame, valid or not, counts as liveness. Returns the frame's `type`
/// on success; on failure an `error` reply has already been written.
#[instrument(skip_all, fields(connection_id = %conn.id))]
pub fn handle_frame(
    conn: &ClientConnection,
    text: &str,
    dispatcher: &Dispatcher,
    events: &EventEmitter,
    now: Instant,
) -> Result<&'static str, ProtocolError> {
    let mut inner = conn.lock();
    dispatcher.note_traffic_locked(conn, &mut inner, now);

    let frame = match parse_client_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "rejected inbound frame");
            let _ = dispatcher.send_protocol_locked(conn, &mut inner, e.to_reply(), now);
            return Err(e);
        }
    };

    let kind = frame.message.kind();
    debug!(kind, frame_id = frame.id.as_deref(), "inbound frame");
    match frame.message {
        ClientMessage::Ping => {
            let _ = dispatcher.send_protocol_locked(conn, &mut inner, ServerMessage::Pong, now);
        }
        ClientMessage::Ack { message_id } => {
            let _ = dispatcher.ack_locked(conn, &mut inner, &message_id);
        }
        ClientMessage::Subscribe { data } => {
            inner.filter = (!data.is_empty()).then(|| data.clone());
            let reply = ServerMessage::Subscribed { filters: Some(data) };
            let _ = dispatcher.send_protocol_locked(conn, &mut inner, reply, now);
        }
        ClientMessage::Unsubscribe => {
            inner.filter = None;
            let reply = ServerMessage::Subscribed { filters: None };
            let _ = dispatcher.send_protocol_locked(conn, &mut inner, reply, now);
        }
        ClientMessage::Data { data } => {
            drop(inner);
            let _ = events.emit(NotifierEvent::ClientData {
                connection_id: conn.id.clone(),
                data,
            });
        }
    }
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::websocket::dispatcher::{Delivery, DeliveryPolicy};
    use crate::websocket::lifecycle::Trigger;
    use crate::websocket::registry::ConnectionRegistry;
    use crate::websocket::testutil::RecordingTransport;
    use assert_matches::assert_matches;
    use galley_core::ids::{ConnectionId, RestaurantId};
    use galley_core::protocol::Envelope;
    use galley_core::state::ConnectionState;
    use galley_settings::RealtimeSettings;
    use serde_json::json;

    struct Fixture {
        dispatcher: Dispatcher,
        events: EventEmitter,
        conn: Arc<ClientConnection>,
        transport: Arc<RecordingTransport>,
    }

    fn fixture() -> Fixture {
        let now = Instant::now();
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(
            DeliveryPolicy::from(&RealtimeSettings::default()),
            Arc::clone(&registry),
            Arc::new(EventEmitter::new(16)),
        );
        let transport = RecordingTransport::new();
        let conn = Arc::new(ClientConnection::new(
            ConnectionId::new("c1"),
            RestaurantId::new("r1"),
            transport.clone(),
            now,
        ));
        registry.register(Arc::clone(&conn)).unwrap();
        let _ = dispatcher.transition(&conn, Trigger::Greeted, now);
        Fixture {
            dispatcher,
            events: EventEmitter::new(16),
            conn,
            transport,
        }
    }

    impl Fixture {
        fn handle(&self, frame: serde_json::Value) -> Result<&'static str, ProtocolError> {
            handle_frame(&self.conn, &frame.to_string(), &self.dispatcher, &self.events, Instant::now())
        }

        fn deliver_stats(&self, now: Instant) -> Delivery {
            let body = ServerMessage::StatsUpdated { stats: json!({}) };
            self.dispatcher.deliver(&self.conn, Envelope::new(body), now)
        }
    }

    #[test]
    fn ping_gets_pong() {
        let fx = fixture();
        assert_eq!(fx.handle(json!({"id": "1", "type": "ping", "timestamp": 1})), Ok("ping"));
        let pongs = fx.transport.of_type("pong");
        assert_eq!(pongs.len(), 1);
        assert!(pongs[0]["timestamp"].is_i64());
        assert_eq!(fx.conn.pending_len(), 0);
    }

    #[test]
    fn ack_settles_pending() {
        let fx = fixture();
        let _ = fx.deliver_stats(Instant::now());
        let id = fx.transport.of_type("stats_updated")[0]["id"].clone();

        assert_eq!(fx.handle(json!({"type": "ack", "messageId": id})), Ok("ack"));
        assert_eq!(fx.conn.pending_len(), 0);
    }

    #[test]
    fn subscribe_then_unsubscribe() {
        let fx = fixture();
        let _ = fx
            .handle(json!({"type": "subscribe", "data": {"statuses": ["FIRED"], "stations": ["grill"]}}))
            .unwrap();
        let filter = fx.conn.filter().unwrap();
        assert!(filter.statuses.unwrap().contains("FIRED"));
        let replies = fx.transport.of_type("subscribed");
        assert_eq!(replies[0]["filters"]["stations"], json!(["grill"]));

        let _ = fx.handle(json!({"type": "unsubscribe"})).unwrap();
        assert!(fx.conn.filter().is_none());
        assert!(fx.transport.of_type("subscribed")[1]["filters"].is_null());
    }

    #[test]
    fn data_is_surfaced_to_observers() {
        let fx = fixture();
        let mut rx = fx.events.subscribe();
        let _ = fx.handle(json!({"type": "data", "data": {"bump": "t1"}})).unwrap();
        assert_matches!(
            rx.try_recv(),
            Ok(NotifierEvent::ClientData { data, .. }) if data == json!({"bump": "t1"})
        );
    }

    #[test]
    fn malformed_json_gets_error_reply() {
        let fx = fixture();
        let result = handle_frame(&fx.conn, "{not json", &fx.dispatcher, &fx.events, Instant::now());
        assert_matches!(result, Err(ProtocolError::Malformed(_)));
        let errors = fx.transport.of_type("error");
        assert_eq!(errors[0]["message"], "Invalid message format");
        assert!(errors[0]["details"].is_string());
        assert_eq!(fx.conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn unknown_type_gets_error_reply() {
        let fx = fixture();
        assert_matches!(
            fx.handle(json!({"type": "teleport"})),
            Err(ProtocolError::UnknownType(t)) if t == "teleport"
        );
        assert_eq!(fx.transport.of_type("error")[0]["message"], "Unknown message type: teleport");
    }

    #[test]
    fn bad_fields_get_error_reply() {
        let fx = fixture();
        assert_matches!(
            fx.handle(json!({"type": "ack"})),
            Err(ProtocolError::InvalidFields { .. })
        );
        assert_eq!(fx.transport.of_type("error")[0]["message"], "Invalid ack message");
    }

    #[test]
    fn any_frame_refreshes_heartbeat() {
        let fx = fixture();
        let later = Instant::now() + Duration::from_secs(40);
        let _ = handle_frame(&fx.conn, "garbage", &fx.dispatcher, &fx.events, later);
        assert_eq!(fx.conn.lock().last_heartbeat, later);
    }

    #[test]
    fn traffic_on_open_socket_revives_connection() {
        let fx = fixture();
        let now = Instant::now();
        let _ = fx.dispatcher.transition(&fx.conn, Trigger::HeartbeatTimeout, now);
        let _ = fx.deliver_stats(now);
        assert_eq!(fx.conn.queue_len(), 1);

        let _ = fx.handle(json!({"type": "ping"})).unwrap();
        assert_eq!(fx.conn.state(), ConnectionState::Connected);
        assert_eq!(fx.conn.reconnect_attempts(), 0);
        assert_eq!(fx.conn.queue_len(), 0);
        let types: Vec<_> = fx.transport.frames().iter().map(|f| f["type"].clone()).collect();
        assert_eq!(types, vec![json!("stats_updated"), json!("pong")]);
    }

    #[test]
    fn pinging_client_that_never_reads_still_fails() {
        let fx = fixture();
        let now = Instant::now();
        fx.transport.set_failing(true);
        assert_eq!(fx.deliver_stats(now), Delivery::Queued);
        assert_eq!(fx.conn.state(), ConnectionState::Reconnecting);
        assert_eq!(fx.conn.reconnect_attempts(), 1);

        // Each frame revives the connection, the drain fails again, and the
        // attempt count keeps climbing.
        for expected in 2..=5 {
            let _ = fx.handle(json!({"type": "ping"}));
            assert_eq!(fx.conn.state(), ConnectionState::Reconnecting);
            assert_eq!(fx.conn.reconnect_attempts(), expected);
        }
        let _ = fx.handle(json!({"type": "ping"}));
        assert_eq!(fx.conn.state(), ConnectionState::Failed);

        let _ = fx.handle(json!({"type": "ping"}));
        assert_eq!(fx.conn.state(), ConnectionState::Failed);
        assert_eq!(fx.conn.queue_len(), 1);
    }
}
