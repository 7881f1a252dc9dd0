//! Runtime configuration for the server and the hub.

use std::time::Duration;

use sigbridge_latency::DEFAULT_STALENESS_TICK;
use sigbridge_settings::{BridgeSettings, ChainSettings};
use sigbridge_transport::EndpointConfig;

/// HTTP/WebSocket listener configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind; `0` picks one.
    pub port: u16,
    /// Interval between WebSocket ping frames.
    pub heartbeat_interval: Duration,
    /// Disconnect an observer silent for longer than this.
    pub heartbeat_timeout: Duration,
    /// Largest accepted observer frame.
    pub max_message_size: usize,
    /// Outbound queue depth per observer.
    pub send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            max_message_size: 1024 * 1024,
            send_queue: 256,
        }
    }
}

impl From<&BridgeSettings> for ServerConfig {
    fn from(settings: &BridgeSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            max_message_size: server.max_message_size,
            send_queue: server.send_queue,
        }
    }
}

/// App-chain probe configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct AppChainConfig {
    /// Emit pings from startup.
    pub enabled: bool,
    /// Ping period.
    pub interval: Duration,
    /// Staleness timeout in ms; negative never expires.
    pub timeout_ms: i64,
    /// Sample window size.
    pub capacity: usize,
}

impl Default for AppChainConfig {
    fn default() -> Self {
        Self::from(&ChainSettings::default())
    }
}

impl From<&ChainSettings> for AppChainConfig {
    fn from(chain: &ChainSettings) -> Self {
        Self {
            enabled: chain.enabled,
            interval: Duration::from_millis(chain.interval_ms),
            timeout_ms: chain.timeout_ms,
            capacity: chain.capacity,
        }
    }
}

/// Hub behaviour.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Endpoint used by `construct` for any omitted field.
    pub default_endpoint: EndpointConfig,
    /// Answer `misc:ping` with `misc:pong`.
    pub auto_pong: bool,
    /// App chain.
    pub app_chain: AppChainConfig,
    /// Staleness poll period.
    pub staleness_tick: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            default_endpoint: EndpointConfig::default(),
            auto_pong: true,
            app_chain: AppChainConfig::default(),
            staleness_tick: DEFAULT_STALENESS_TICK,
        }
    }
}

impl From<&BridgeSettings> for HubConfig {
    fn from(settings: &BridgeSettings) -> Self {
        let transport = &settings.transport;
        Self {
            default_endpoint: EndpointConfig::new(
                transport.host.clone(),
                transport.signal_port,
                transport.command_port,
            ),
            auto_pong: settings.probes.auto_pong,
            app_chain: AppChainConfig::from(&settings.probes.app),
            staleness_tick: Duration::from_millis(settings.probes.staleness_tick_ms),
        }
    }
}
