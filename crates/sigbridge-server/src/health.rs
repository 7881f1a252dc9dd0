//! `/health` payload.

use std::time::Instant;

use serde::Serialize;
use sigbridge_latency::{AppAverages, ChainStatus};
use sigbridge_transport::EndpointConfig;

use crate::hub::RelayHub;

/// Transport section of the health payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportHealth {
    /// Bound endpoint.
    pub endpoint: EndpointConfig,
    /// Local address of the inbound socket.
    pub signal_addr: Option<String>,
    /// Most recent observed one-way latency, `-1` if none.
    pub last_known_latency: i64,
}

/// Health check response body.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` while the server runs.
    pub status: &'static str,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// Connected observers.
    pub observers: usize,
    /// Absent until the first `construct`.
    pub transport: Option<TransportHealth>,
    /// App probe chain.
    pub app_chain: ChainStatus<AppAverages>,
}

/// Snapshot the hub.
pub async fn health_check(start_time: Instant, hub: &RelayHub) -> HealthResponse {
    let transport = match hub.transport() {
        Some(transport) => match transport.endpoint().await {
            Some(endpoint) => Some(TransportHealth {
                endpoint,
                signal_addr: transport.local_addr().await.map(|a| a.to_string()),
                last_known_latency: transport.last_known_latency(),
            }),
            None => None,
        },
        None => None,
    };
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        observers: hub.observers().len(),
        transport,
        app_chain: hub.app_status(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::HubConfig;
    use crate::protocol::ConstructParams;

    #[tokio::test]
    async fn fresh_hub_has_no_transport() {
        let hub = RelayHub::new(HubConfig::default(), &CancellationToken::new());
        let resp = health_check(Instant::now(), &hub).await;
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.observers, 0);
        assert!(resp.transport.is_none());
        assert!(!resp.app_chain.alive);
    }

    #[tokio::test]
    async fn uptime_counts_from_start() {
        let hub = RelayHub::new(HubConfig::default(), &CancellationToken::new());
        let start = Instant::now()
            .checked_sub(Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, &hub).await;
        assert!(resp.uptime_secs >= 59);
    }

    #[tokio::test]
    async fn bound_transport_is_reported() {
        let hub = RelayHub::new(HubConfig::default(), &CancellationToken::new());
        let _ = hub
            .construct(ConstructParams {
                host: Some("127.0.0.1".into()),
                signal_port: Some(0),
                command_port: Some(9001),
            })
            .await
            .unwrap();
        let resp = health_check(Instant::now(), &hub).await;
        let transport = resp.transport.unwrap();
        assert_eq!(transport.endpoint.command_port, 9001);
        assert!(transport.signal_addr.unwrap().starts_with("127.0.0.1:"));
        assert_eq!(transport.last_known_latency, -1);

        let json = serde_json::to_value(health_check(Instant::now(), &hub).await).unwrap();
        assert_eq!(json["transport"]["endpoint"]["commandPort"], 9001);
        assert_eq!(json["transport"]["lastKnownLatency"], -1);
        assert!(json["transport"]["signalAddr"].is_string());
        assert_eq!(json["appChain"]["chain"], "app");
        assert!(json["uptimeSecs"].is_u64());
        assert!(json.get("app_chain").is_none());
    }
}
