//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder and return its render handle.
///
/// Fails if a recorder is already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Observer connections accepted (counter).
pub const OBSERVER_CONNECTIONS_TOTAL: &str = "observer_connections_total";
/// Observer disconnections (counter).
pub const OBSERVER_DISCONNECTIONS_TOTAL: &str = "observer_disconnections_total";
/// Connected observers (gauge).
pub const OBSERVERS_ACTIVE: &str = "observers_active";
/// Observer connection lifetime (histogram).
pub const OBSERVER_CONNECTION_DURATION_SECONDS: &str = "observer_connection_duration_seconds";
/// Frames dropped on a full observer queue (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "broadcast_drops_total";
/// Decoded inbound signals (counter, labels: signal).
pub const SIGNALS_RECEIVED_TOTAL: &str = "signals_received_total";
/// Transport notifications (counter, labels: kind).
pub const TRANSPORT_EVENTS_TOTAL: &str = "transport_events_total";
/// Observer commands handled (counter, labels: command).
pub const COMMANDS_TOTAL: &str = "commands_total";
/// Observer commands refused (counter, labels: command, error_type).
pub const COMMAND_REJECTIONS_TOTAL: &str = "command_rejections_total";
/// App chain round trip in ms (histogram).
pub const APP_ROUND_TRIP_MS: &str = "app_round_trip_ms";
/// App chain liveness, 1 alive and 0 unknown (gauge).
pub const APP_CHAIN_ALIVE: &str = "app_chain_alive";
