//! Outbound write seam between a connection and its socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use galley_core::errors::TransportError;
use tokio::sync::mpsc;

/// Item consumed by a socket writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized envelope, written as a text frame.
    Frame(Arc<str>),
    /// Send a close frame and stop.
    Close,
}

/// Non-blocking write side of one dashboard socket.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Queue a frame for writing. Never blocks.
    fn send(&self, frame: Arc<str>) -> Result<(), TransportError>;
    /// Ask the writer to close the socket.
    fn close(&self);
    /// Whether the socket is known to be gone.
    fn is_closed(&self) -> bool;
}

/// [`Transport`] backed by a bounded channel feeding a writer task.
pub struct ChannelTransport {
    tx: mpsc::Sender<Outbound>,
    closed: AtomicBool,
}

impl ChannelTransport {
    /// Create a transport and the receiver its writer task drains.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Record that the socket is gone (writer failed or reader ended).
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Arc<str>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.tx.try_send(Outbound::Frame(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => {
                self.mark_closed();
                TransportError::Closed
            }
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.try_send(Outbound::Close);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}
