//! # sigbridge-transport
//!
//! The Signal Transport: one inbound UDP socket receiving envelopes from the
//! instrumented application and one outbound UDP socket sending commands
//! back to it.
//!
//! The transport is reconfigurable at runtime. Every outcome that the caller
//! does not await directly (bind, send, decode, receive) is published as a
//! [`TransportEvent`] and never fails the process.

#![deny(unsafe_code)]

pub mod endpoint;
pub mod errors;
pub mod events;
pub mod transport;

pub use endpoint::EndpointConfig;
pub use errors::TransportError;
pub use events::TransportEvent;
pub use transport::{SignalListener, SignalTransport};
