//! `BridgeServer`: Axum HTTP + WebSocket front of the relay hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::{HubConfig, ServerConfig};
use crate::health::{self, HealthResponse};
use crate::hub::RelayHub;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::ObserverConnection;
use crate::websocket::session::{SessionOptions, run_observer_session};

/// State shared with the Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub every session talks to.
    pub hub: Arc<RelayHub>,
    /// Server start, for uptime.
    pub start_time: Instant,
    /// Prometheus renderer.
    pub metrics: PrometheusHandle,
    /// Heartbeat and queue settings for new sessions.
    pub session: SessionOptions,
    /// Largest accepted observer frame.
    pub max_message_size: usize,
    /// Root shutdown token.
    pub shutdown: CancellationToken,
}

/// The bridge server.
pub struct BridgeServer {
    config: ServerConfig,
    hub: Arc<RelayHub>,
    shutdown: ShutdownCoordinator,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl BridgeServer {
    /// Build the server and its hub. Must run inside a tokio runtime.
    pub fn new(config: ServerConfig, hub_config: HubConfig, metrics: PrometheusHandle) -> Self {
        let shutdown = ShutdownCoordinator::new();
        let hub = RelayHub::new(hub_config, &shutdown.token());
        Self {
            config,
            hub,
            shutdown,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Routes: `/health`, `/metrics`, `/ws`.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            session: SessionOptions {
                heartbeat_interval: self.config.heartbeat_interval,
                heartbeat_timeout: self.config.heartbeat_timeout,
                send_queue: self.config.send_queue,
            },
            max_message_size: self.config.max_message_size,
            shutdown: self.shutdown.token(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve in the background until shutdown. Returns the bound
    /// address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "bridge server listening");
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Cancel everything, wait for `server` to drain, then close the hub.
    pub async fn shutdown_gracefully(&self, server: JoinHandle<()>, timeout: Option<Duration>) {
        self.shutdown.graceful_shutdown(vec![server], timeout).await;
        self.hub.close().await;
        info!("bridge server stopped");
    }

    /// The relay hub.
    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, &state.hub).await)
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let observer_id = ObserverConnection::generate_id();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| {
            run_observer_session(socket, observer_id, state.hub, state.session, state.shutdown)
        })
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use super::*;

    fn make_server() -> BridgeServer {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        BridgeServer::new(ServerConfig::default(), HubConfig::default(), handle)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_reports_hub_state() {
        let server = make_server();
        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["observers"], 0);
        assert!(body["transport"].is_null());
        assert_eq!(body["appChain"]["chain"], "app");
        assert!(body["uptimeSecs"].is_u64());
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_requires_upgrade() {
        let server = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let server = make_server();
        let (status, _) = get_json(server.router(), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server
            .shutdown_gracefully(handle, Some(Duration::from_secs(2)))
            .await;
        assert!(server.shutdown().is_shutting_down());
        assert!(server.hub().transport().is_none());
    }
}
