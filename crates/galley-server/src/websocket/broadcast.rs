//! Restaurant-scoped fan-out of kitchen notifications.

use std::sync::Arc;

use galley_core::filter::filter_matches;
use galley_core::ids::RestaurantId;
use galley_core::protocol::{Priority, ServerMessage};
use metrics::histogram;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::dispatcher::Dispatcher;
use super::registry::ConnectionRegistry;
use crate::metrics::NOTIFY_BROADCAST_RECIPIENTS;

/// Sound hint for new tickets.
pub const SOUND_NEW_TICKET: &str = "new_ticket";
/// Sound hint for tickets ready for pickup.
pub const SOUND_TICKET_READY: &str = "ticket_ready";
/// Sound hint for emergency alerts.
pub const SOUND_EMERGENCY_ALERT: &str = "emergency_alert";

/// The surface business code uses to notify kitchen dashboards.
///
/// Every method returns the number of connections a delivery was accepted
/// for (written or queued). Failures are reported through logs and
/// notifier events, never returned.
pub trait KitchenNotifier: Send + Sync {
    /// Deliver `message` to every matching connection of `restaurant_id`.
    fn broadcast_to_restaurant(&self, restaurant_id: &RestaurantId, message: ServerMessage) -> usize;

    /// A ticket changed.
    fn notify_ticket_update(&self, restaurant_id: &RestaurantId, ticket: Value) -> usize {
        self.broadcast_to_restaurant(
            restaurant_id,
            ServerMessage::TicketUpdated {
                ticket,
                sound: None,
                priority: None,
            },
        )
    }

    /// A ticket was created.
    fn notify_new_ticket(&self, restaurant_id: &RestaurantId, ticket: Value) -> usize {
        self.broadcast_to_restaurant(
            restaurant_id,
            ServerMessage::NewTicket {
                ticket,
                sound: Some(SOUND_NEW_TICKET.to_owned()),
                priority: None,
            },
        )
    }

    /// A ticket is ready for pickup.
    fn notify_ticket_ready(&self, restaurant_id: &RestaurantId, ticket: Value) -> usize {
        self.broadcast_to_restaurant(
            restaurant_id,
            ServerMessage::TicketReady {
                ticket,
                sound: Some(SOUND_TICKET_READY.to_owned()),
                priority: Some(Priority::High),
            },
        )
    }

    /// Kitchen statistics changed.
    fn notify_stats_update(&self, restaurant_id: &RestaurantId, stats: Value) -> usize {
        self.broadcast_to_restaurant(restaurant_id, ServerMessage::StatsUpdated { stats })
    }

    /// Timer tick for one ticket.
    fn notify_timer_update(&self, restaurant_id: &RestaurantId, ticket_id: &str, time_data: Value) -> usize {
        self.broadcast_to_restaurant(
            restaurant_id,
            ServerMessage::TimerUpdate {
                ticket_id: ticket_id.to_owned(),
                time_data,
            },
        )
    }

    /// Kitchen-wide emergency.
    fn notify_emergency_alert(&self, restaurant_id: &RestaurantId, alert: Value) -> usize {
        self.broadcast_to_restaurant(
            restaurant_id,
            ServerMessage::EmergencyAlert {
                alert,
                priority: Priority::High,
                sound: SOUND_EMERGENCY_ALERT.to_owned(),
            },
        )
    }
}

/// Applies subscription filters and hands each match to the dispatcher.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl Broadcaster {
    /// Broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    /// Deliver `message` to every connection of `restaurant_id` whose filter
    /// matches. Each recipient gets its own envelope (own id, own ack).
    /// Protocol bodies only reach `CONNECTED` sockets and are never ack-tracked.
    pub fn broadcast(&self, restaurant_id: &RestaurantId, message: &ServerMessage, now: Instant) -> usize {
        let connections = self.registry.list_by_restaurant(restaurant_id);
        let mut matched = 0;
        let mut accepted = 0;
        for conn in &connections {
            if !filter_matches(conn.filter().as_ref(), message) {
                continue;
            }
            matched += 1;
            match self.dispatcher.send(&conn.id, message.clone(), now) {
                Ok(delivery) if delivery.accepted() => accepted += 1,
                Ok(_) => {}
                Err(e) => debug!(connection_id = %conn.id, error = %e, "recipient left before delivery"),
            }
        }
        histogram!(NOTIFY_BROADCAST_RECIPIENTS).record(accepted as f64);
        debug!(
            %restaurant_id,
            message_type = %message.message_type(),
            connections = connections.len(),
            matched,
            accepted,
            "broadcast to restaurant"
        );
        accepted
    }
}

impl KitchenNotifier for Broadcaster {
    fn broadcast_to_restaurant(&self, restaurant_id: &RestaurantId, message: ServerMessage) -> usize {
        self.broadcast(restaurant_id, &message, Instant::now())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
