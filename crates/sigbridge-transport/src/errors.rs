//! Transport error types.

use thiserror::Error;

/// Why `configure` could not produce a bound socket pair.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint can never be used.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// Binding a local socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// `host:port` that was attempted.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// The command destination could not be resolved.
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        /// `host:port` that was looked up.
        addr: String,
        /// Lookup error.
        #[source]
        source: std::io::Error,
    },
}
