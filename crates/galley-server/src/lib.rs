//! # galley-server
//!
//! Reliable real-time notifications for kitchen dashboards.
//!
//! - Connection registry scoped by restaurant, with a per-connection
//!   lifecycle state machine
//! - At-least-once delivery: ack tracking on one deadline heap, bounded
//!   retries, bounded outbound queues
//! - Heartbeat sweep and reconnection bookkeeping
//! - Filtered restaurant broadcasts behind [`KitchenNotifier`]
//! - axum `WebSocket` endpoint, `/health`, Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod health;
pub mod metrics;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod websocket;

pub use server::GalleyServer;
pub use service::NotificationService;
pub use websocket::broadcast::KitchenNotifier;
