//! Broadcast channel for [`NotifierEvent`]s.

use galley_core::events::NotifierEvent;
use tokio::sync::broadcast;

/// Fan-out of notifier events to observers.
///
/// `emit` never blocks; observers that fall behind lag and lose events.
pub struct EventEmitter {
    tx: broadcast::Sender<NotifierEvent>,
}

impl EventEmitter {
    /// Emitter with room for `capacity` unread events per observer.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns how many observers received it.
    pub fn emit(&self, event: NotifierEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// New observer; sees events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<NotifierEvent> {
        self.tx.subscribe()
    }
}
