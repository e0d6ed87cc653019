//! Reconnection bookkeeping.
//!
//! The dashboard reconnects on its own; the server only counts attempts.
//! Each due attempt either schedules the next one (`base * attempt` later)
//! or, once attempts are exhausted, moves the connection to `FAILED` for the
//! heartbeat sweep to purge. A successful resume resets the counter.

use std::sync::Arc;

use tokio::time::Instant;

use super::dispatcher::Dispatcher;
use super::lifecycle::Trigger;
use super::registry::ConnectionRegistry;

/// Fires due reconnection attempts.
pub struct ReconnectScheduler {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl ReconnectScheduler {
    /// Scheduler over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    /// Advance every connection whose attempt is due at `now`.
    ///
    /// Returns how many attempts were processed.
    pub fn process_due(&self, now: Instant) -> usize {
        let mut processed = 0;
        for conn in self.registry.all() {
            let mut inner = conn.lock();
            if !inner.next_reconnect_at.is_some_and(|due| due <= now) {
                continue;
            }
            let effects = self
                .dispatcher
                .transition_locked(&conn, &mut inner, Trigger::ReconnectDue, now);
            if !effects.is_empty() {
                processed += 1;
            }
        }
        processed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
