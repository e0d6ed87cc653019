//! Server-side record of one logical dashboard connection.
//!
//! Identity fields are immutable. Everything the dispatcher, heartbeat
//! monitor, and inbound handler mutate lives in [`ConnectionInner`] behind
//! a single per-connection lock, so all of them share one synchronization
//! discipline.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use galley_core::filter::SubscriptionFilter;
use galley_core::ids::{ConnectionId, MessageId, RestaurantId};
use galley_core::protocol::Envelope;
use galley_core::state::ConnectionState;
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

use super::transport::Transport;

/// An envelope written to the socket and awaiting acknowledgment.
#[derive(Clone, Debug)]
pub struct PendingAck {
    /// The envelope as last written.
    pub envelope: Envelope,
    /// When the resend (or failure) is due.
    pub deadline: Instant,
}

/// Mutable per-connection state.
pub struct ConnectionInner {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Last time any client traffic was seen.
    pub last_heartbeat: Instant,
    /// Reconnection bookkeeping attempts since the last time it was connected.
    pub reconnect_attempts: u32,
    /// When the next reconnection bookkeeping attempt is due.
    pub next_reconnect_at: Option<Instant>,
    /// Subscription filter; `None` receives everything.
    pub filter: Option<SubscriptionFilter>,
    /// Bounded FIFO of envelopes not yet written.
    pub queue: VecDeque<Envelope>,
    /// Written envelopes awaiting an ack, by message id.
    pub pending: HashMap<MessageId, PendingAck>,
    /// Current socket, if one is attached.
    pub transport: Option<Arc<dyn Transport>>,
}

/// One logical dashboard connection.
pub struct ClientConnection {
    /// Unique id, also the `clientId` a dashboard resumes with.
    pub id: ConnectionId,
    /// Restaurant scope. Never changes.
    pub restaurant_id: RestaurantId,
    /// When the logical connection was created.
    pub connected_at: Instant,
    inner: Mutex<ConnectionInner>,
}

impl ClientConnection {
    /// New connection in `CONNECTING` with `transport` attached.
    pub fn new(
        id: ConnectionId,
        restaurant_id: RestaurantId,
        transport: Arc<dyn Transport>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            restaurant_id,
            connected_at: now,
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Connecting,
                last_heartbeat: now,
                reconnect_attempts: 0,
                next_reconnect_at: None,
                filter: None,
                queue: VecDeque::new(),
                pending: HashMap::new(),
                transport: Some(transport),
            }),
        }
    }

    /// Lock the mutable state.
    pub fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Number of envelopes waiting in the outbound queue.
    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Number of envelopes awaiting an ack.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Current reconnection attempt counter.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().reconnect_attempts
    }

    /// Copy of the subscription filter.
    pub fn filter(&self) -> Option<SubscriptionFilter> {
        self.inner.lock().filter.clone()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("restaurant_id", &self.restaurant_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
