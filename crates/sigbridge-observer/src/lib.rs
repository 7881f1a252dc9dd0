//! # sigbridge-observer
//!
//! Client side of the observer WebSocket. Connects to a relay hub, issues
//! commands, and runs the server probe chain (`ack_request` round trips)
//! against it.

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod probe;

pub use client::{ClientOptions, ObserverClient};
pub use errors::ObserverError;
pub use probe::ServerProbe;
