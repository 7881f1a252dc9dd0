//! Observer WebSocket plumbing.

pub mod broadcast;
pub mod connection;
pub mod session;
