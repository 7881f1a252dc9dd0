//! One observer's WebSocket, from upgrade to disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ObserverConnection;
use crate::hub::RelayHub;
use crate::metrics::{
    OBSERVER_CONNECTION_DURATION_SECONDS, OBSERVER_CONNECTIONS_TOTAL,
    OBSERVER_DISCONNECTIONS_TOTAL, OBSERVERS_ACTIVE,
};
use crate::protocol::ObserverEvent;

/// Per-session knobs, taken from the server config.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Ping period.
    pub heartbeat_interval: Duration,
    /// Silence after which the observer is dropped.
    pub heartbeat_timeout: Duration,
    /// Outbound queue depth.
    pub send_queue: usize,
}

/// Drive one observer session.
///
/// The observer gets `connected` first, then joins the broadcast set.
/// Inbound frames are handled in order on this task; outbound frames and
/// pings go through a separate writer task. Leaving removes the observer
/// from the set and nothing else.
#[instrument(skip_all, fields(observer_id = %observer_id))]
pub async fn run_observer_session(
    ws: WebSocket,
    observer_id: String,
    hub: Arc<RelayHub>,
    options: SessionOptions,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(options.send_queue.max(1));
    let observer = Arc::new(ObserverConnection::new(observer_id.clone(), tx));
    let started = Instant::now();

    info!("observer connected");
    counter!(OBSERVER_CONNECTIONS_TOTAL).increment(1);
    gauge!(OBSERVERS_ACTIVE).increment(1.0);

    let _ = observer.send_event(&ObserverEvent::Connected {
        observer_id: observer_id.clone(),
    });
    hub.observers().add(Arc::clone(&observer));

    let writer_observer = Arc::clone(&observer);
    let writer_shutdown = shutdown.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(options.heartbeat_interval.max(Duration::from_millis(1)));
        let _ = ping.tick().await;
        loop {
            tokio::select! {
                () = writer_shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if writer_observer.idle_for() > options.heartbeat_timeout {
                        warn!(timeout = ?options.heartbeat_timeout, "observer unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = &mut writer => {
                debug!("writer finished");
                break;
            }
            frame = ws_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                observer.touch();
                match frame {
                    Message::Text(text) => hub.handle_command(&observer, text.as_str()).await,
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => hub.handle_command(&observer, text).await,
                        Err(_) => debug!(len = data.len(), "ignoring non-UTF-8 binary frame"),
                    },
                    Message::Close(_) => {
                        debug!("observer sent close");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }

    let _ = hub.observers().remove(&observer_id);
    if !writer.is_finished() {
        // let the writer flush a close frame on shutdown
        if shutdown.is_cancelled() {
            let _ = tokio::time::timeout(Duration::from_millis(100), &mut writer).await;
        }
        writer.abort();
    }
    info!(dropped = observer.drop_count(), "observer disconnected");
    counter!(OBSERVER_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(OBSERVERS_ACTIVE).decrement(1.0);
    histogram!(OBSERVER_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
