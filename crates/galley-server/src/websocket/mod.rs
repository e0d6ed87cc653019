//! Dashboard connections: registry, lifecycle, delivery, liveness, and fan-out.

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod emitter;
pub mod handler;
pub mod heartbeat;
pub mod lifecycle;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;
