//! # sigbridge-server
//!
//! The Relay Hub and its HTTP surface.
//!
//! Observers connect over WebSocket at `/ws`. Every datagram the
//! [`SignalTransport`](sigbridge_transport::SignalTransport) decodes is
//! broadcast to all of them as a `receive` event, and their commands are
//! relayed back to the application. `/health` and `/metrics` expose liveness
//! and Prometheus counters.

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{HubConfig, ServerConfig};
pub use errors::CommandError;
pub use hub::RelayHub;
pub use protocol::{ObserverCommand, ObserverEvent};
pub use server::BridgeServer;
