//! # galley-core
//!
//! Foundation types for the Galley kitchen-dashboard notification layer.
//!
//! This crate is the shared vocabulary between the realtime server and the
//! business code that emits notifications:
//!
//! - **Branded IDs**: [`ids::ConnectionId`], [`ids::RestaurantId`], [`ids::MessageId`]
//! - **Protocol**: [`protocol::ClientFrame`] (inbound) and [`protocol::Envelope`] /
//!   [`protocol::ServerMessage`] (outbound) as closed tagged unions
//! - **Filters**: [`filter::SubscriptionFilter`] and its match predicate
//! - **State**: [`state::ConnectionState`] lifecycle states
//! - **Events**: [`events::NotifierEvent`] observable lifecycle/delivery events
//! - **Errors**: [`errors::NotifyError`], [`errors::TransportError`], [`errors::ProtocolError`]
//! - **Logging**: [`logging::init_subscriber`]
//!
//! ## Crate Position
//!
//! Foundation crate. No I/O, no async runtime.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod filter;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod state;
