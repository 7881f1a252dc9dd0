//! # sigbridge-core
//!
//! Shared vocabulary for the signal bridge crates:
//!
//! - **Envelope**: the stamped JSON object wrapping every signal ([`Envelope`])
//! - **Codec**: stamping, encoding, and decoding of datagram payloads ([`codec`])
//! - **Signals**: reserved signal names used by the probe protocol ([`signals`])
//! - **Errors**: decode/encode failures via `thiserror` ([`errors`])
//! - **Logging**: `tracing` subscriber setup ([`logging`])

#![deny(unsafe_code)]

pub mod clock;
pub mod codec;
pub mod envelope;
pub mod errors;
pub mod logging;
pub mod signals;

pub use envelope::{Envelope, PROTOCOL_VERSION};
pub use errors::{DecodeError, EncodeError};
