//! `ObserverClient`: one WebSocket connection to a relay hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use sigbridge_core::clock::now_millis;
use sigbridge_core::{Envelope, codec, signals};
use sigbridge_latency::{
    ChainKind, ChainState, ChainStatus, DEFAULT_CAPACITY, DEFAULT_STALENESS_TICK, ProbeScheduler,
    ServerAverages, ServerSample, SharedChain, run_staleness_watch,
};
use sigbridge_server::protocol::{ConfigureParams, ConstructParams, ProbeParams};
use sigbridge_server::{ObserverCommand, ObserverEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ObserverError;
use crate::probe::ServerProbe;

/// Client tuning.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Server chain window size.
    pub capacity: usize,
    /// Server chain staleness timeout in ms; negative never expires.
    pub timeout_ms: i64,
    /// Staleness poll period.
    pub staleness_tick: Duration,
    /// Depth of the outbound command queue and the event channel.
    pub buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            timeout_ms: 3000,
            staleness_tick: DEFAULT_STALENESS_TICK,
            buffer: 256,
        }
    }
}

struct ClientState {
    server_chain: SharedChain<ServerSample>,
    last_latency: AtomicI64,
    observer_id: Mutex<Option<String>>,
}

/// A connected observer.
///
/// Incoming events are delivered on the receiver returned by
/// [`connect`](Self::connect). `ack` replies are also folded into the
/// server chain before delivery.
pub struct ObserverClient {
    commands: mpsc::Sender<String>,
    state: Arc<ClientState>,
    server_probe: ProbeScheduler,
    cancel: CancellationToken,
}

impl ObserverClient {
    /// Connect with default options.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::Receiver<ObserverEvent>), ObserverError> {
        Self::connect_with(url, ClientOptions::default()).await
    }

    /// Connect to `url` (e.g. `ws://127.0.0.1:8080/ws`).
    pub async fn connect_with(
        url: &str,
        options: ClientOptions,
    ) -> Result<(Self, mpsc::Receiver<ObserverEvent>), ObserverError> {
        let (ws, _) = connect_async(url).await?;
        info!(url, "connected to relay hub");
        let (mut ws_tx, mut ws_rx) = ws.split();

        let buffer = options.buffer.max(1);
        let (commands, mut outbound) = mpsc::channel::<String>(buffer);
        let (events_tx, events_rx) = mpsc::channel(buffer);
        let cancel = CancellationToken::new();

        let server_chain = ChainState::<ServerSample>::new(
            ChainKind::Server,
            options.capacity,
            0,
            options.timeout_ms,
        )
        .shared();
        let state = Arc::new(ClientState {
            server_chain: Arc::clone(&server_chain),
            last_latency: AtomicI64::new(-1),
            observer_id: Mutex::new(None),
        });

        let writer_cancel = cancel.clone();
        drop(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = writer_cancel.cancelled() => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    frame = outbound.recv() => {
                        let Some(frame) = frame else { break };
                        if let Err(e) = ws_tx.send(Message::text(frame)).await {
                            warn!(error = %e, "failed to send command");
                            break;
                        }
                    }
                }
            }
        }));

        let reader_cancel = cancel.clone();
        let reader_state = Arc::clone(&state);
        drop(tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    () = reader_cancel.cancelled() => break,
                    frame = ws_rx.next() => frame,
                };
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "observer connection failed");
                        break;
                    }
                };
                let Some(event) = reader_state.ingest(&text, now_millis()) else {
                    continue;
                };
                if events_tx.send(event).await.is_err() {
                    debug!("event receiver dropped");
                }
            }
            info!("disconnected from relay hub");
            reader_cancel.cancel();
        }));

        let watch_cancel = cancel.clone();
        drop(tokio::spawn(run_staleness_watch(
            server_chain,
            options.staleness_tick,
            watch_cancel,
            |status| {
                info!(alive = status.alive, "server chain stale");
                std::future::ready(())
            },
        )));

        let server_probe = ProbeScheduler::new(
            ChainKind::Server.as_str(),
            Arc::new(ServerProbe::new(commands.clone())),
            cancel.clone(),
        );

        Ok((
            Self {
                commands,
                state,
                server_probe,
                cancel,
            },
            events_rx,
        ))
    }

    /// Queue a command.
    pub async fn command(&self, command: &ObserverCommand) -> Result<(), ObserverError> {
        self.commands
            .send(command.to_value().to_string())
            .await
            .map_err(|_| ObserverError::Closed)
    }

    /// Create or rebind the hub's transport.
    pub async fn construct(&self, params: ConstructParams) -> Result<(), ObserverError> {
        self.command(&ObserverCommand::Construct(params)).await
    }

    /// Rebind the hub's transport.
    pub async fn configure(&self, params: ConfigureParams) -> Result<(), ObserverError> {
        self.command(&ObserverCommand::Configure(params)).await
    }

    /// Have the hub stamp and send `msg`.
    pub async fn send(&self, msg: Map<String, Value>) -> Result<(), ObserverError> {
        self.command(&ObserverCommand::Send { msg }).await
    }

    /// Stamp `msg` here and have the hub send it unchanged. Returns the
    /// envelope as sent.
    pub async fn send_constructed(&self, msg: Map<String, Value>) -> Result<Envelope, ObserverError> {
        let envelope = codec::stamp(msg, now_millis());
        self.command(&ObserverCommand::SendConstructed {
            msg: envelope.clone(),
        })
        .await?;
        Ok(envelope)
    }

    /// Run a console command in the application.
    pub async fn console_in(&self, cmd: &str, object: Option<Value>) -> Result<Envelope, ObserverError> {
        self.send_constructed(signal_fields(
            signals::CONSOLE_IN,
            [("cmd", Value::from(cmd)), ("object", object.unwrap_or(Value::Null))],
        ))
        .await
    }

    /// Change a property of an inspected element.
    pub async fn elements_mod(
        &self,
        element: Value,
        property: &str,
        value: Value,
    ) -> Result<Envelope, ObserverError> {
        self.send_constructed(signal_fields(
            signals::ELEMENTS_MOD,
            [
                ("element", element),
                ("property", Value::from(property)),
                ("value", value),
            ],
        ))
        .await
    }

    /// Answer an application ping.
    pub async fn pong(&self) -> Result<Envelope, ObserverError> {
        self.send_constructed(signal_fields(signals::PONG, [])).await
    }

    /// Send one server-chain probe now.
    pub async fn request_ack(&self) -> Result<(), ObserverError> {
        self.command(&ServerProbe::request(now_millis())).await
    }

    /// Retune the hub's app chain.
    pub async fn probe(&self, params: ProbeParams) -> Result<(), ObserverError> {
        self.command(&ObserverCommand::Probe(params)).await
    }

    /// Ask for the app chain status.
    pub async fn status(&self) -> Result<(), ObserverError> {
        self.command(&ObserverCommand::Status).await
    }

    /// Start probing the server every `interval`.
    pub fn enable_server_probe(&self, interval: Duration) {
        {
            let mut chain = self.state.server_chain.lock();
            chain.set_enabled(true);
            chain.set_interval_ms(interval.as_millis() as u64);
        }
        self.server_probe.enable(interval);
    }

    /// Stop probing the server. Collected samples are kept.
    pub fn disable_server_probe(&self) {
        self.state.server_chain.lock().set_enabled(false);
        self.server_probe.disable();
    }

    /// Server chain snapshot.
    pub fn server_status(&self) -> ChainStatus<ServerAverages> {
        self.state.server_chain.lock().status()
    }

    /// Most recent `now - sent` seen on any incoming frame, `-1` if none.
    pub fn last_known_latency(&self) -> i64 {
        self.state.last_latency.load(Ordering::Relaxed)
    }

    /// Id assigned by the hub, once `connected` has arrived.
    pub fn observer_id(&self) -> Option<String> {
        self.state.observer_id.lock().clone()
    }

    /// Whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Close the connection and stop all timers. Idempotent.
    pub fn close(&self) {
        self.server_probe.disable();
        self.cancel.cancel();
    }
}

impl Drop for ObserverClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ClientState {
    /// Apply an incoming frame to client state and decode it.
    fn ingest(&self, text: &str, now: i64) -> Option<ObserverEvent> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable frame from hub");
                return None;
            }
        };
        if let Some(latency) = observed_latency(&value, now) {
            self.last_latency.store(latency, Ordering::Relaxed);
        }
        let event: ObserverEvent = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "unrecognized event from hub");
                return None;
            }
        };
        match &event {
            ObserverEvent::Connected { observer_id } => {
                *self.observer_id.lock() = Some(observer_id.clone());
            }
            ObserverEvent::Ack { .. } => {
                if let Some(sample) = sample_from_ack(&event, now) {
                    let recorded = self.server_chain.lock().record(sample, now);
                    if recorded.transition == Some(true) {
                        info!("server chain alive");
                    }
                    debug!(round_trip = recorded.sample.round_trip(), "server probe answered");
                }
            }
            _ => {}
        }
        Some(event)
    }
}

/// Server sample from an `ack` received at `now`. `None` when the echoed
/// request has no `requested` stamp.
pub fn sample_from_ack(event: &ObserverEvent, now: i64) -> Option<ServerSample> {
    let ObserverEvent::Ack {
        received,
        responded,
        request,
    } = event
    else {
        return None;
    };
    Some(ServerSample {
        requested: request.get("requested")?.as_i64()?,
        received: *received,
        responded: *responded,
        received_at_client: now,
    })
}

/// `now - sent` for a frame carrying `sent` at the top level or in `msg`.
/// `None` when the difference does not fit in an `i64`.
pub fn observed_latency(frame: &Value, now: i64) -> Option<i64> {
    let sent = frame
        .get("sent")
        .or_else(|| frame.get("msg").and_then(|m| m.get("sent")))?;
    let sent = sent
        .as_i64()
        .or_else(|| sent.as_f64().map(|f| f as i64))
        .or_else(|| sent.as_str().and_then(|s| s.parse().ok()))?;
    now.checked_sub(sent)
}

fn signal_fields<const N: usize>(signal: &str, fields: [(&str, Value); N]) -> Map<String, Value> {
    let mut map = Map::new();
    let _ = map.insert("signal".into(), json!(signal));
    for (key, value) in fields {
        let _ = map.insert(key.into(), value);
    }
    map
}
