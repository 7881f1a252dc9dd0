//! Settings types.
//!
//! All structs use camelCase on disk and `#[serde(default)]` so a partial
//! settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};
use sigbridge_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings for the bridge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Observer-facing HTTP/WebSocket server.
    pub server: ServerSettings,
    /// UDP endpoint towards the instrumented application.
    pub transport: TransportSettings,
    /// Probe chains and staleness polling.
    pub probes: ProbeSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl BridgeSettings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(SettingsError::Invalid("server.host is empty".into()));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::Invalid(
                "server.maxMessageSize must be non-zero".into(),
            ));
        }
        if self.server.send_queue == 0 {
            return Err(SettingsError::Invalid(
                "server.sendQueue must be non-zero".into(),
            ));
        }
        if self.transport.host.is_empty() {
            return Err(SettingsError::Invalid("transport.host is empty".into()));
        }
        if self.transport.command_port == 0 {
            return Err(SettingsError::Invalid(
                "transport.commandPort must be non-zero".into(),
            ));
        }
        if self.probes.staleness_tick_ms == 0 {
            return Err(SettingsError::Invalid(
                "probes.stalenessTickMs must be non-zero".into(),
            ));
        }
        self.probes.app.validate("probes.app")?;
        self.probes.server.validate("probes.server")
    }
}

/// Observer-facing server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (0 = ephemeral).
    pub port: u16,
    /// WebSocket ping interval.
    pub heartbeat_interval_ms: u64,
    /// Close an observer that has not answered a ping for this long.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted observer frame, in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per observer.
    pub send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 1024 * 1024,
            send_queue: 256,
        }
    }
}

/// Default UDP endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Host for both sockets; also the default for `construct`.
    pub host: String,
    /// Inbound datagram port.
    pub signal_port: u16,
    /// Destination port for commands.
    pub command_port: u16,
    /// Build the transport at startup instead of waiting for `construct`.
    pub construct_on_start: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            signal_port: 9000,
            command_port: 9001,
            construct_on_start: false,
        }
    }
}

/// Probe chain settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeSettings {
    /// App chain (ping/pong over UDP).
    pub app: ChainSettings,
    /// Server chain (ack round trips over the observer socket).
    pub server: ChainSettings,
    /// Staleness poll period.
    pub staleness_tick_ms: u64,
    /// Answer `misc:ping` from the application with `misc:pong`.
    pub auto_pong: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            app: ChainSettings::default(),
            server: ChainSettings::default(),
            staleness_tick_ms: 200,
            auto_pong: true,
        }
    }
}

/// One probe chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainSettings {
    /// Emit probes from startup.
    pub enabled: bool,
    /// Probe period.
    pub interval_ms: u64,
    /// Staleness timeout. Negative means never expire.
    pub timeout_ms: i64,
    /// Sample window size.
    pub capacity: usize,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1000,
            timeout_ms: 3000,
            capacity: 50,
        }
    }
}

impl ChainSettings {
    fn validate(&self, prefix: &str) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(SettingsError::Invalid(format!(
                "{prefix}.intervalMs must be non-zero"
            )));
        }
        if self.capacity == 0 {
            return Err(SettingsError::Invalid(format!(
                "{prefix}.capacity must be non-zero"
            )));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// `compact` or `json`.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
