//! # sigbridge-latency
//!
//! Round-trip measurement for the two probe chains:
//!
//! - **Server chain**: observer ↔ hub `ack_request`/`ack` exchange, four
//!   timestamps per sample ([`ServerSample`])
//! - **App chain**: hub ↔ application `misc:ping`/`misc:pong`, three
//!   timestamps per sample ([`AppSample`])
//!
//! Samples are clamped to be non-decreasing before they are stored in a
//! fixed-capacity [`SampleWindow`]. Averages are recomputed from the whole
//! window after every insert. [`ProbeScheduler`] emits probes on a timer and
//! [`run_staleness_watch`] marks a chain unknown when responses stop.

#![deny(unsafe_code)]

pub mod chain;
pub mod sampler;
pub mod scheduler;

pub use chain::{ChainKind, ChainState, ChainStatus, Recorded, SharedChain};
pub use sampler::{
    AppAverages, AppSample, DEFAULT_CAPACITY, Sample, SampleWindow, ServerAverages, ServerSample,
};
pub use scheduler::{DEFAULT_STALENESS_TICK, ProbeEmitter, ProbeScheduler, run_staleness_watch};
