//! Endpoint configuration for the UDP socket pair.

use serde::{Deserialize, Serialize};

use crate::errors::TransportError;

/// Default inbound signal port.
pub const DEFAULT_SIGNAL_PORT: u16 = 9000;
/// Default outbound command port.
pub const DEFAULT_COMMAND_PORT: u16 = 9001;
/// Default host for both sockets.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Where the transport listens and where it sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Host used to bind the inbound socket and to reach the application.
    pub host: String,
    /// Inbound port. `0` binds an ephemeral port.
    pub signal_port: u16,
    /// Destination port on `host` for outbound commands.
    pub command_port: u16,
}

impl EndpointConfig {
    /// Build an endpoint.
    pub fn new(host: impl Into<String>, signal_port: u16, command_port: u16) -> Self {
        Self {
            host: host.into(),
            signal_port,
            command_port,
        }
    }

    /// Reject endpoints that can never bind or send.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.host.trim().is_empty() {
            return Err(TransportError::InvalidEndpoint("host is empty".into()));
        }
        if self.command_port == 0 {
            return Err(TransportError::InvalidEndpoint(
                "commandPort must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_SIGNAL_PORT, DEFAULT_COMMAND_PORT)
    }
}

impl std::fmt::Display for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (signal {}, command {})",
            self.host, self.signal_port, self.command_port
        )
    }
}
