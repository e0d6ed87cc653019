//! The notification service: one instance per process.
//!
//! Owns the registry, dispatcher, heartbeat monitor, reconnect scheduler and
//! event emitter, and runs one maintenance task that drives the heartbeat
//! sweep and the ack/reconnect timers. Collaborators hold an
//! `Arc<NotificationService>` and notify dashboards through
//! [`KitchenNotifier`].

use std::sync::Arc;

use galley_core::errors::{NotifyError, ProtocolError};
use galley_core::events::{DisconnectReason, NotifierEvent};
use galley_core::ids::{ConnectionId, RestaurantId};
use galley_core::protocol::{ClientConfig, ServerMessage};
use galley_settings::RealtimeSettings;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::{Broadcaster, KitchenNotifier};
use crate::websocket::connection::ClientConnection;
use crate::websocket::dispatcher::{DeadlineReport, DeliveryPolicy, Dispatcher};
use crate::websocket::emitter::EventEmitter;
use crate::websocket::handler;
use crate::websocket::heartbeat::{HeartbeatMonitor, SweepReport};
use crate::websocket::lifecycle::Trigger;
use crate::websocket::reconnect::ReconnectScheduler;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::transport::Transport;

/// A socket bound to a logical connection.
#[derive(Clone, Debug)]
pub struct Attachment {
    /// The logical connection.
    pub connection: Arc<ClientConnection>,
    /// Whether an existing connection was resumed and is live again.
    pub resumed: bool,
}

/// Registry, delivery, and liveness for every dashboard connection.
pub struct NotificationService {
    settings: RealtimeSettings,
    registry: Arc<ConnectionRegistry>,
    events: Arc<EventEmitter>,
    dispatcher: Arc<Dispatcher>,
    heartbeat: HeartbeatMonitor,
    reconnect: ReconnectScheduler,
    broadcaster: Broadcaster,
    shutdown: ShutdownCoordinator,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationService {
    /// Build a stopped service.
    pub fn new(settings: RealtimeSettings) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let events = Arc::new(EventEmitter::new(settings.event_channel_capacity));
        let dispatcher = Arc::new(Dispatcher::new(
            DeliveryPolicy::from(&settings),
            Arc::clone(&registry),
            Arc::clone(&events),
        ));
        let heartbeat = HeartbeatMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            settings.heartbeat_interval(),
            settings.heartbeat_timeout(),
        );
        let reconnect = ReconnectScheduler::new(Arc::clone(&registry), Arc::clone(&dispatcher));
        let broadcaster = Broadcaster::new(Arc::clone(&registry), Arc::clone(&dispatcher));
        Arc::new(Self {
            settings,
            registry,
            events,
            dispatcher,
            heartbeat,
            reconnect,
            broadcaster,
            shutdown: ShutdownCoordinator::new(),
            maintenance: Mutex::new(None),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Spawn the maintenance task. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.maintenance.lock();
        if slot.is_some() || self.is_shutting_down() {
            return;
        }
        let service = Arc::clone(self);
        let token = self.shutdown.token();
        let sweep_period = self.settings.sweep_period();
        let ack_period = self.settings.ack_check_interval();

        *slot = Some(tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_period);
            let mut timers = tokio::time::interval(ack_period);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timers.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate first ticks
            let _ = sweep.tick().await;
            let _ = timers.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = sweep.tick() => {
                        let _ = service.sweep_heartbeats(Instant::now());
                    }
                    _ = timers.tick() => {
                        let _ = service.process_timers(Instant::now());
                    }
                }
            }
            debug!("maintenance task stopped");
        }));
        info!(
            sweep_ms = sweep_period.as_millis() as u64,
            ack_check_ms = ack_period.as_millis() as u64,
            "notification service started"
        );
    }

    /// Stop the maintenance task and close every connection.
    ///
    /// Afterwards `attach` fails with [`NotifyError::ShuttingDown`] and
    /// broadcasts reach nobody.
    pub async fn shutdown(&self) {
        self.shutdown.shutdown();
        let task = self.maintenance.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "maintenance task ended abnormally");
            }
        }
        let now = Instant::now();
        let mut closed = 0;
        for conn in self.registry.all() {
            if self.dispatcher.release(&conn.id, DisconnectReason::Shutdown, now).is_some() {
                closed += 1;
            }
        }
        info!(closed, "notification service stopped");
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.shutdown.token()
    }

    // ── Connections ─────────────────────────────────────────────────

    /// Bind a new socket for `restaurant_id`.
    ///
    /// With `resume`, reattaches to that logical connection when it belongs
    /// to the same restaurant and is awaiting a reconnect. Otherwise a fresh
    /// connection is created.
    pub fn attach(
        &self,
        restaurant_id: RestaurantId,
        resume: Option<&ConnectionId>,
        transport: Arc<dyn Transport>,
    ) -> Result<Attachment, NotifyError> {
        if self.is_shutting_down() {
            return Err(NotifyError::ShuttingDown);
        }
        let now = Instant::now();
        if let Some(id) = resume {
            match self.resume(&restaurant_id, id, Arc::clone(&transport), now) {
                Ok(connection) => {
                    let resumed = connection.state().is_deliverable();
                    return Ok(Attachment { connection, resumed });
                }
                Err(e) => debug!(connection_id = %id, error = %e, "resume refused, creating a new connection"),
            }
        }
        let connection = self.accept(restaurant_id, transport, now)?;
        Ok(Attachment {
            connection,
            resumed: false,
        })
    }

    /// Register and greet a new logical connection.
    pub fn accept(
        &self,
        restaurant_id: RestaurantId,
        transport: Arc<dyn Transport>,
        now: Instant,
    ) -> Result<Arc<ClientConnection>, NotifyError> {
        let conn = Arc::new(ClientConnection::new(
            ConnectionId::generate(),
            restaurant_id,
            transport,
            now,
        ));
        self.registry.register(Arc::clone(&conn))?;
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

        {
            let mut inner = conn.lock();
            if self
                .dispatcher
                .send_protocol_locked(&conn, &mut inner, self.greeting(&conn), now)
            {
                let _ = self
                    .dispatcher
                    .transition_locked(&conn, &mut inner, Trigger::Greeted, now);
            }
        }

        info!(
            connection_id = %conn.id,
            restaurant_id = %conn.restaurant_id,
            "dashboard connected"
        );
        let _ = self.events.emit(NotifierEvent::ClientConnected {
            connection_id: conn.id.clone(),
            restaurant_id: conn.restaurant_id.clone(),
        });
        Ok(conn)
    }

    /// Reattach `transport` to an existing connection awaiting a reconnect.
    ///
    /// The old socket is closed, the greeting is resent, and the queue is
    /// drained in order. If the greeting cannot be written the transport
    /// stays attached but the connection keeps awaiting a reconnect, and no
    /// `ClientResumed` event is emitted.
    pub fn resume(
        &self,
        restaurant_id: &RestaurantId,
        id: &ConnectionId,
        transport: Arc<dyn Transport>,
        now: Instant,
    ) -> Result<Arc<ClientConnection>, NotifyError> {
        let conn = self.registry.require(id)?;
        if &conn.restaurant_id != restaurant_id {
            return Err(NotifyError::ConnectionNotFound(id.clone()));
        }

        let state = {
            let mut inner = conn.lock();
            if !inner.state.is_resumable() {
                return Err(NotifyError::ConnectionFailed {
                    id: id.clone(),
                    state: inner.state,
                });
            }
            if let Some(old) = inner.transport.replace(transport) {
                old.close();
            }
            inner.last_heartbeat = now;
            if self
                .dispatcher
                .send_protocol_locked(&conn, &mut inner, self.greeting(&conn), now)
            {
                let _ = self
                    .dispatcher
                    .transition_locked(&conn, &mut inner, Trigger::Resumed, now);
            }
            inner.state
        };

        if !state.is_deliverable() {
            warn!(
                connection_id = %conn.id,
                restaurant_id = %conn.restaurant_id,
                %state,
                "resume greeting not delivered"
            );
            return Ok(conn);
        }
        info!(
            connection_id = %conn.id,
            restaurant_id = %conn.restaurant_id,
            "dashboard resumed"
        );
        let _ = self.events.emit(NotifierEvent::ClientResumed {
            connection_id: conn.id.clone(),
            restaurant_id: conn.restaurant_id.clone(),
        });
        Ok(conn)
    }

    fn greeting(&self, conn: &ClientConnection) -> ServerMessage {
        ServerMessage::Connected {
            client_id: conn.id.clone(),
            restaurant_id: conn.restaurant_id.clone(),
            config: ClientConfig {
                heartbeat_interval_ms: self.settings.heartbeat_interval_ms,
                message_timeout_ms: self.settings.message_timeout_ms,
                max_retries: self.settings.max_retries,
            },
        }
    }

    /// Apply one inbound text frame.
    pub fn handle_frame(&self, conn: &ClientConnection, text: &str) -> Result<&'static str, ProtocolError> {
        handler::handle_frame(conn, text, &self.dispatcher, &self.events, Instant::now())
    }

    /// Record non-text client traffic (pings, pongs, binary noise).
    ///
    /// Counts as liveness exactly like a text frame, reviving a connection
    /// whose socket is still open.
    pub fn touch(&self, conn: &ClientConnection) {
        self.dispatcher.note_traffic(conn, Instant::now());
    }

    /// Close and remove a connection. Returns `false` if it was not registered.
    pub fn close(&self, id: &ConnectionId, reason: DisconnectReason) -> bool {
        self.dispatcher.release(id, reason, Instant::now()).is_some()
    }

    /// A socket ended. Ignored unless `transport` is still the connection's
    /// current one (a resumed connection has already moved on).
    ///
    /// A clean close removes the connection; anything else leaves it
    /// awaiting a resume.
    pub fn socket_ended(&self, conn: &ClientConnection, transport: &Arc<dyn Transport>, clean_close: bool) {
        let now = Instant::now();
        let mut inner = conn.lock();
        let current = inner
            .transport
            .as_ref()
            .is_some_and(|t| std::ptr::addr_eq(Arc::as_ptr(t), Arc::as_ptr(transport)));
        if !current {
            debug!(connection_id = %conn.id, "stale socket ended");
            return;
        }
        if clean_close {
            drop(inner);
            let _ = self.dispatcher.release(&conn.id, DisconnectReason::ClientClosed, now);
            return;
        }
        if let Some(old) = inner.transport.take() {
            old.close();
        }
        info!(
            connection_id = %conn.id,
            restaurant_id = %conn.restaurant_id,
            "socket lost, awaiting resume"
        );
        let _ = self
            .dispatcher
            .transition_locked(conn, &mut inner, Trigger::TransportLost, now);
    }

    // ── Maintenance ─────────────────────────────────────────────────

    /// One heartbeat sweep.
    pub fn sweep_heartbeats(&self, now: Instant) -> SweepReport {
        self.heartbeat.sweep(now)
    }

    /// Expire ack deadlines, then advance due reconnect attempts.
    pub fn process_timers(&self, now: Instant) -> (DeadlineReport, usize) {
        let deadlines = self.dispatcher.process_deadlines(now);
        let reconnects = self.reconnect.process_due(now);
        (deadlines, reconnects)
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// New observer of notifier events.
    pub fn subscribe(&self) -> broadcast::Receiver<NotifierEvent> {
        self.events.subscribe()
    }

    /// Look up a connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.registry.get(id)
    }

    /// Registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Restaurants with at least one connection.
    pub fn restaurant_count(&self) -> usize {
        self.registry.restaurant_count()
    }

    /// Active settings.
    pub fn settings(&self) -> &RealtimeSettings {
        &self.settings
    }
}

impl KitchenNotifier for NotificationService {
    fn broadcast_to_restaurant(&self, restaurant_id: &RestaurantId, message: ServerMessage) -> usize {
        if self.is_shutting_down() {
            debug!(%restaurant_id, "broadcast skipped during shutdown");
            return 0;
        }
        self.broadcaster.broadcast(restaurant_id, &message, Instant::now())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
