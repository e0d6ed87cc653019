//! Reliable delivery: immediate writes, bounded queues, and ack tracking.
//!
//! Every domain envelope written to a socket is recorded in the connection's
//! `pending` map and gets an entry in one deadline-ordered heap shared by all
//! connections. Acks only touch the map; heap entries are checked lazily
//! against it when they come due, so stale entries (acked, resent, or
//! belonging to a removed connection) are discarded on pop.
//!
//! All per-connection mutation happens under the connection's lock. Methods
//! ending in `_locked` expect the caller to hold it.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use galley_core::errors::{NotifyError, TransportError};
use galley_core::events::{DisconnectReason, NotifierEvent};
use galley_core::ids::{ConnectionId, MessageId};
use galley_core::protocol::{Envelope, ServerMessage};
use galley_core::state::ConnectionState;
use galley_settings::RealtimeSettings;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::connection::{ClientConnection, ConnectionInner, PendingAck};
use super::emitter::EventEmitter;
use super::lifecycle::{self, Effect, ReconnectPolicy, Trigger};
use super::registry::ConnectionRegistry;
use crate::metrics::{
    NOTIFY_ACKS_TOTAL, NOTIFY_MESSAGE_RETRIES_TOTAL, NOTIFY_MESSAGES_DROPPED_TOTAL,
    NOTIFY_MESSAGES_FAILED_TOTAL, NOTIFY_MESSAGES_QUEUED_TOTAL, NOTIFY_MESSAGES_SENT_TOTAL,
    NOTIFY_STATE_TRANSITIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_DISCONNECTIONS_TOTAL,
};

/// Delivery tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Ack deadline per write.
    pub message_timeout: Duration,
    /// Resends before a message is reported failed.
    pub max_retries: u32,
    /// Outbound queue capacity per connection.
    pub max_queue_size: usize,
    /// Reconnection backoff.
    pub reconnect: ReconnectPolicy,
}

impl From<&RealtimeSettings> for DeliveryPolicy {
    fn from(s: &RealtimeSettings) -> Self {
        Self {
            message_timeout: s.message_timeout(),
            max_retries: s.max_retries,
            max_queue_size: s.max_queue_size,
            reconnect: ReconnectPolicy {
                base_delay: s.reconnect_delay(),
                max_attempts: s.reconnect_max_attempts,
            },
        }
    }
}

/// What happened to one delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the socket. Domain envelopes then await an ack.
    Sent,
    /// Parked in the outbound queue.
    Queued,
    /// Rejected by a full queue, or a protocol body with no live socket.
    Dropped,
    /// The connection has failed.
    Rejected,
}

impl Delivery {
    /// Sent or queued.
    pub fn accepted(self) -> bool {
        matches!(self, Self::Sent | Self::Queued)
    }
}

/// Outcome of one deadline pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeadlineReport {
    /// Messages re-delivered after an ack timeout.
    pub retried: usize,
    /// Messages that exhausted their retries.
    pub failed: usize,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct AckDeadline {
    deadline: Instant,
    seq: u64,
    connection_id: ConnectionId,
    message_id: MessageId,
    attempt: u32,
}

/// Sends, queues, retries, and retires messages for every connection.
pub struct Dispatcher {
    policy: DeliveryPolicy,
    registry: Arc<ConnectionRegistry>,
    events: Arc<EventEmitter>,
    deadlines: Mutex<BinaryHeap<Reverse<AckDeadline>>>,
    seq: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`, reporting to `events`.
    pub fn new(
        policy: DeliveryPolicy,
        registry: Arc<ConnectionRegistry>,
        events: Arc<EventEmitter>,
    ) -> Self {
        Self {
            policy,
            registry,
            events,
            deadlines: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
        }
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Wrap `body` in a new envelope and deliver it to connection `id`.
    pub fn send(
        &self,
        id: &ConnectionId,
        body: ServerMessage,
        now: Instant,
    ) -> Result<Delivery, NotifyError> {
        let conn = self.registry.require(id)?;
        Ok(self.deliver(&conn, Envelope::new(body), now))
    }

    /// Deliver `envelope` to `conn`.
    pub fn deliver(&self, conn: &ClientConnection, envelope: Envelope, now: Instant) -> Delivery {
        let mut inner = conn.lock();
        self.deliver_locked(conn, &mut inner, envelope, now)
    }

    /// Write immediately when `CONNECTED`, otherwise queue.
    ///
    /// A failed write moves the connection out of `CONNECTED` and puts the
    /// envelope in the queue. Protocol bodies bypass both the queue and ack
    /// tracking: they are written only while `CONNECTED` and dropped
    /// otherwise.
    pub fn deliver_locked(
        &self,
        conn: &ClientConnection,
        inner: &mut ConnectionInner,
        envelope: Envelope,
        now: Instant,
    ) -> Delivery {
        if inner.state.is_terminal() {
            debug!(connection_id = %conn.id, message_type = %envelope.message_type(), "delivery to failed connection rejected");
            return Delivery::Rejected;
        }
        if envelope.message_type().is_protocol() {
            if inner.state.is_deliverable() && self.write_protocol_locked(conn, inner, &envelope, now) {
                return Delivery::Sent;
            }
            debug!(connection_id = %conn.id, state = %inner.state, message_type = %envelope.message_type(), "protocol message dropped");
            return Delivery::Dropped;
        }
        if !inner.state.is_deliverable() {
            return self.enqueue(conn, inner, envelope);
        }
        match write(inner, &envelope) {
            Ok(()) => {
                self.track(conn, inner, envelope, now);
                Delivery::Sent
            }
            Err(NotifyError::Serialization(e)) => {
                error!(connection_id = %conn.id, error = %e, "failed to serialize envelope");
                Delivery::Dropped
            }
            Err(e) => {
                warn!(
                    connection_id = %conn.id,
                    restaurant_id = %conn.restaurant_id,
                    message_type = %envelope.message_type(),
                    error = %e,
                    "socket write failed, queueing for redelivery"
                );
                let _ = self.transition_locked(conn, inner, Trigger::SendFailure, now);
                self.enqueue(conn, inner, envelope)
            }
        }
    }

    /// Write a protocol envelope directly. Never queued, never ack-tracked.
    ///
    /// Returns whether the write succeeded.
    pub fn send_protocol_locked(
        &self,
        conn: &ClientConnection,
        inner: &mut ConnectionInner,
        body: ServerMessage,
        now: Instant,
    ) -> bool {
        self.write_protocol_locked(conn, inner, &Envelope::new(body), now)
    }

    fn write_protocol_locked(
        &self,
        conn: &ClientConnection,
        inner: &mut ConnectionInner,
        envelope: &Envelope,
        now: Instant,
    ) -> bool {
        match write(inner, envelope) {
            Ok(()) => {
                debug!(connection_id = %conn.id, message_type = %envelope.message_type(), "protocol message sent");
                true
            }
            Err(e) => {
                debug!(connection_id = %conn.id, message_type = %envelope.message_type(), error = %e, "protocol message not sent");
                if matches!(e, NotifyError::Transport(_)) {
                    let _ = self.transition_locked(conn, inner, Trigger::SendFailure, now);
                }
                false
            }
        }
    }

    fn enqueue(&self, conn: &ClientConnection, inner: &mut ConnectionInner, envelope: Envelope) -> Delivery {
        let message_type = envelope.message_type();
        let queue_len = inner.queue.len();
        if queue_len >= self.policy.max_queue_size {
            warn!(
                connection_id = %conn.id,
                restaurant_id = %conn.restaurant_id,
                %message_type,
                queue_len,
                "outbound queue full, dropping message"
            );
            counter!(NOTIFY_MESSAGES_DROPPED_TOTAL).increment(1);
            let _ = self.events.emit(NotifierEvent::MessageDropped {
                connection_id: conn.id.clone(),
                message_type,
                queue_len,
            });
            return Delivery::Dropped;
        }
        inner.queue.push_back(envelope);
        counter!(NOTIFY_MESSAGES_QUEUED_TOTAL).increment(1);
        debug!(connection_id = %conn.id, %message_type, queue_len = queue_len + 1, "message queued");
        Delivery::Queued
    }

    fn track(&self, conn: &ClientConnection, inner: &mut ConnectionInner, envelope: Envelope, now: Instant) {
        let deadline = now + self.policy.message_timeout;
        counter!(NOTIFY_MESSAGES_SENT_TOTAL, "type" => envelope.message_type().as_str()).increment(1);
        let entry = AckDeadline {
            deadline,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            connection_id: conn.id.clone(),
            message_id: envelope.id.clone(),
            attempt: envelope.retry_count,
        };
        let _ = inner
            .pending
            .insert(envelope.id.clone(), PendingAck { envelope, deadline });
        self.deadlines.lock().push(Reverse(entry));
    }

    /// Write queued envelopes in FIFO order while the connection stays
    /// `CONNECTED`. Stops at the first failed write, leaving the rest queued.
    pub fn drain_locked(&self, conn: &ClientConnection, inner: &mut ConnectionInner, now: Instant) -> usize {
        let mut sent = 0;
        while inner.state.is_deliverable() {
            let Some(envelope) = inner.queue.pop_front() else {
                break;
            };
            match write(inner, &envelope) {
                Ok(()) => {
                    self.track(conn, inner, envelope, now);
                    sent += 1;
                }
                Err(NotifyError::Serialization(e)) => {
                    error!(connection_id = %conn.id, error = %e, "failed to serialize queued envelope");
                }
                Err(e) => {
                    warn!(connection_id = %conn.id, error = %e, remaining = inner.queue.len() + 1, "queue drain interrupted");
                    inner.queue.push_front(envelope);
                    let _ = self.transition_locked(conn, inner, Trigger::SendFailure, now);
                    break;
                }
            }
        }
        if sent > 0 {
            debug!(connection_id = %conn.id, sent, remaining = inner.queue.len(), "outbound queue drained");
        }
        sent
    }

    // ── Acks and deadlines ──────────────────────────────────────────

    /// Settle a pending envelope. Returns `false` for unknown ids.
    pub fn ack_locked(&self, conn: &ClientConnection, inner: &mut ConnectionInner, message_id: &MessageId) -> bool {
        if inner.pending.remove(message_id).is_some() {
            counter!(NOTIFY_ACKS_TOTAL).increment(1);
            debug!(connection_id = %conn.id, %message_id, "message acknowledged");
            true
        } else {
            debug!(connection_id = %conn.id, %message_id, "ack for unknown message ignored");
            false
        }
    }

    /// Resend or fail every envelope whose ack deadline is at or before `now`.
    pub fn process_deadlines(&self, now: Instant) -> DeadlineReport {
        let due = {
            let mut heap = self.deadlines.lock();
            let mut due = Vec::new();
            while heap.peek().is_some_and(|Reverse(e)| e.deadline <= now) {
                if let Some(Reverse(entry)) = heap.pop() {
                    due.push(entry);
                }
            }
            due
        };

        let mut report = DeadlineReport::default();
        for entry in due {
            let Some(conn) = self.registry.get(&entry.connection_id) else {
                continue;
            };
            let mut inner = conn.lock();
            let current = inner
                .pending
                .get(&entry.message_id)
                .is_some_and(|p| p.envelope.retry_count == entry.attempt);
            if !current {
                continue;
            }
            let Some(PendingAck { envelope, .. }) = inner.pending.remove(&entry.message_id) else {
                continue;
            };

            if envelope.retry_count < self.policy.max_retries {
                let retry = envelope.next_attempt();
                counter!(NOTIFY_MESSAGE_RETRIES_TOTAL).increment(1);
                debug!(
                    connection_id = %conn.id,
                    message_id = %retry.id,
                    retry_count = retry.retry_count,
                    "ack timeout, resending"
                );
                let _ = self.deliver_locked(&conn, &mut inner, retry, now);
                report.retried += 1;
            } else {
                let attempts = envelope.retry_count + 1;
                warn!(
                    connection_id = %conn.id,
                    restaurant_id = %conn.restaurant_id,
                    message_id = %envelope.id,
                    message_type = %envelope.message_type(),
                    attempts,
                    "message unacknowledged after all retries"
                );
                counter!(NOTIFY_MESSAGES_FAILED_TOTAL).increment(1);
                let _ = self.events.emit(NotifierEvent::MessageFailed {
                    connection_id: conn.id.clone(),
                    message_id: envelope.id.clone(),
                    message_type: envelope.message_type(),
                    attempts,
                });
                report.failed += 1;
            }
        }
        report
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Fire `trigger` on `conn`, report the effects, and drain the queue if
    /// the connection entered `CONNECTED`.
    pub fn transition_locked(
        &self,
        conn: &ClientConnection,
        inner: &mut ConnectionInner,
        trigger: Trigger,
        now: Instant,
    ) -> Vec<Effect> {
        let effects = lifecycle::fire(inner, trigger, now, &self.policy.reconnect);
        let mut connected = false;
        for effect in &effects {
            match *effect {
                Effect::StateChanged { from, to } => {
                    info!(
                        connection_id = %conn.id,
                        restaurant_id = %conn.restaurant_id,
                        %from,
                        %to,
                        ?trigger,
                        "connection state changed"
                    );
                    counter!(NOTIFY_STATE_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
                    let _ = self.events.emit(NotifierEvent::StateChanged {
                        connection_id: conn.id.clone(),
                        from,
                        to,
                    });
                    connected = to == ConnectionState::Connected;
                }
                Effect::ReconnectScheduled { attempt, delay } => {
                    let delay_ms = delay.as_millis() as u64;
                    info!(connection_id = %conn.id, attempt, delay_ms, "reconnect attempt scheduled");
                    let _ = self.events.emit(NotifierEvent::ReconnectScheduled {
                        connection_id: conn.id.clone(),
                        attempt,
                        delay_ms,
                    });
                }
            }
        }
        if connected {
            let _ = self.drain_locked(conn, inner, now);
        }
        effects
    }

    /// Record client traffic on `conn` and revive it if it was awaiting a
    /// reconnect while its socket stayed open.
    ///
    /// The attempt counter is only reset once the revived connection has
    /// drained its queue and is still `CONNECTED`; a socket that takes
    /// frames in but cannot be written to keeps counting toward `FAILED`.
    pub fn note_traffic_locked(&self, conn: &ClientConnection, inner: &mut ConnectionInner, now: Instant) {
        inner.last_heartbeat = now;
        let transport_open = inner.transport.as_ref().is_some_and(|t| !t.is_closed());
        if !inner.state.is_resumable() || !transport_open {
            return;
        }
        let _ = self.transition_locked(conn, inner, Trigger::Traffic, now);
        if inner.state.is_deliverable() {
            inner.reconnect_attempts = 0;
        }
    }

    /// Lock `conn` and record client traffic.
    pub fn note_traffic(&self, conn: &ClientConnection, now: Instant) {
        let mut inner = conn.lock();
        self.note_traffic_locked(conn, &mut inner, now);
    }

    /// Lock `conn` and fire `trigger`.
    pub fn transition(&self, conn: &ClientConnection, trigger: Trigger, now: Instant) -> Vec<Effect> {
        let mut inner = conn.lock();
        self.transition_locked(conn, &mut inner, trigger, now)
    }

    /// Remove a connection from the registry and discard everything it holds:
    /// pending acks, queued envelopes, and the socket.
    pub fn release(
        &self,
        id: &ConnectionId,
        reason: DisconnectReason,
        now: Instant,
    ) -> Option<Arc<ClientConnection>> {
        let conn = self.registry.unregister(id)?;
        {
            let mut inner = conn.lock();
            let _ = self.transition_locked(&conn, &mut inner, Trigger::Close, now);
            let discarded_pending = inner.pending.len();
            let discarded_queued = inner.queue.len();
            inner.pending.clear();
            inner.queue.clear();
            if let Some(transport) = inner.transport.take() {
                transport.close();
            }
            info!(
                connection_id = %conn.id,
                restaurant_id = %conn.restaurant_id,
                reason = reason.as_str(),
                discarded_pending,
                discarded_queued,
                "connection released"
            );
        }
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS)
            .record(now.saturating_duration_since(conn.connected_at).as_secs_f64());
        let _ = self.events.emit(NotifierEvent::ClientDisconnected {
            connection_id: conn.id.clone(),
            restaurant_id: conn.restaurant_id.clone(),
            reason,
        });
        Some(conn)
    }
}

fn write(inner: &ConnectionInner, envelope: &Envelope) -> Result<(), NotifyError> {
    let transport = inner.transport.as_ref().ok_or(TransportError::Closed)?;
    let json = envelope.to_json()?;
    transport.send(Arc::from(json))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
