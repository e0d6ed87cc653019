//! Connection lifecycle state machine.
//!
//! | From | Trigger | To |
//! |------|---------|----|
//! | `CONNECTING` | registered and greeted | `CONNECTED` |
//! | `DISCONNECTED` / `RECONNECTING` | client resumed | `CONNECTED`, attempts reset |
//! | `DISCONNECTED` / `RECONNECTING` | traffic on a still-open socket | `CONNECTED`, attempts kept |
//! | `CONNECTED` | heartbeat timeout | `DISCONNECTED`, then a reconnect step |
//! | `CONNECTED` | write failure / socket lost | reconnect step |
//! | `DISCONNECTED` / `RECONNECTING` | reconnect attempt due | reconnect step |
//! | any | explicit close | `DISCONNECTED` |
//!
//! A reconnect step moves to `RECONNECTING` and schedules the next attempt
//! while `attempts < max`, otherwise to `FAILED`. `FAILED` is terminal.
//!
//! [`fire`] is pure over [`ConnectionInner`]: it returns what happened and
//! leaves logging, metrics, events, and queue draining to the caller.

use std::time::Duration;

use galley_core::state::ConnectionState;
use tokio::time::Instant;

use super::connection::ConnectionInner;

/// Something that may move a connection to another state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Registered and the greeting was written.
    Greeted,
    /// The client came back with a resume handshake on a new socket.
    Resumed,
    /// The client sent traffic on a socket that never closed.
    Traffic,
    /// No client traffic for longer than the heartbeat timeout.
    HeartbeatTimeout,
    /// A write to the socket failed.
    SendFailure,
    /// The socket ended without a close frame.
    TransportLost,
    /// A scheduled reconnection attempt is due.
    ReconnectDue,
    /// Explicit close by either side.
    Close,
}

/// Linear reconnection backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay unit, multiplied by the attempt number.
    pub base_delay: Duration,
    /// Attempts before the connection fails.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based): `base_delay * attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Observable outcome of firing a trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// The state changed.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// A reconnection attempt was scheduled.
    ReconnectScheduled {
        /// Attempt number.
        attempt: u32,
        /// Delay until it is due.
        delay: Duration,
    },
}

/// Apply `trigger` to `inner`, returning the effects in order.
///
/// Triggers that do not apply to the current state are ignored.
pub fn fire(
    inner: &mut ConnectionInner,
    trigger: Trigger,
    now: Instant,
    policy: &ReconnectPolicy,
) -> Vec<Effect> {
    use ConnectionState::{Connected, Connecting, Disconnected, Failed, Reconnecting};

    let mut effects = Vec::new();
    match (trigger, inner.state) {
        (_, Failed) => {}
        (Trigger::Greeted, Connecting) => {
            inner.reconnect_attempts = 0;
            set_state(inner, Connected, &mut effects);
        }
        (Trigger::Resumed, Disconnected | Reconnecting) => {
            inner.reconnect_attempts = 0;
            inner.next_reconnect_at = None;
            set_state(inner, Connected, &mut effects);
        }
        (Trigger::Traffic, Disconnected | Reconnecting) => {
            inner.next_reconnect_at = None;
            set_state(inner, Connected, &mut effects);
        }
        (Trigger::HeartbeatTimeout, Connected) => {
            set_state(inner, Disconnected, &mut effects);
            reconnect_step(inner, now, policy, &mut effects);
        }
        (Trigger::SendFailure | Trigger::TransportLost, Connected | Connecting) => {
            reconnect_step(inner, now, policy, &mut effects);
        }
        (Trigger::ReconnectDue, Disconnected | Reconnecting) => {
            if inner.next_reconnect_at.is_some_and(|due| due <= now) {
                reconnect_step(inner, now, policy, &mut effects);
            }
        }
        (Trigger::Close, _) => {
            inner.next_reconnect_at = None;
            set_state(inner, Disconnected, &mut effects);
        }
        _ => {}
    }
    effects
}

fn reconnect_step(
    inner: &mut ConnectionInner,
    now: Instant,
    policy: &ReconnectPolicy,
    effects: &mut Vec<Effect>,
) {
    if inner.reconnect_attempts < policy.max_attempts {
        inner.reconnect_attempts += 1;
        let attempt = inner.reconnect_attempts;
        let delay = policy.delay_for(attempt);
        inner.next_reconnect_at = Some(now + delay);
        set_state(inner, ConnectionState::Reconnecting, effects);
        effects.push(Effect::ReconnectScheduled { attempt, delay });
    } else {
        inner.next_reconnect_at = None;
        set_state(inner, ConnectionState::Failed, effects);
    }
}

fn set_state(inner: &mut ConnectionInner, to: ConnectionState, effects: &mut Vec<Effect>) {
    let from = inner.state;
    if from != to {
        inner.state = to;
        effects.push(Effect::StateChanged { from, to });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
