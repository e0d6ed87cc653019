//! Test helpers: an in-memory transport that records frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use galley_core::errors::TransportError;
use parking_lot::Mutex;
use serde_json::Value;

use super::transport::Transport;

/// Records every frame written; can be switched to fail writes the way a
/// socket with a full outbound buffer does.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    frames: Mutex<Vec<Value>>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All frames written so far.
    pub(crate) fn frames(&self) -> Vec<Value> {
        self.frames.lock().clone()
    }

    /// Frames of one wire `type`.
    pub(crate) fn of_type(&self, kind: &str) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f["type"] == kind)
            .cloned()
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: Arc<str>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Backpressure);
        }
        let value: Value = serde_json::from_str(&frame).unwrap_or(Value::Null);
        self.frames.lock().push(value);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
