//! The UDP socket pair and its receive loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use sigbridge_core::clock::now_millis;
use sigbridge_core::{Envelope, codec};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::endpoint::EndpointConfig;
use crate::errors::TransportError;
use crate::events::TransportEvent;

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 64 * 1024;
/// Pause after a socket receive error.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(50);
/// Event channel depth.
const EVENT_CAPACITY: usize = 256;

/// Consumer of decoded inbound envelopes.
///
/// The receive loop awaits each call before reading the next datagram, so
/// calls arrive in decode order.
#[async_trait]
pub trait SignalListener: Send + Sync {
    /// Handle one envelope.
    async fn on_signal(&self, envelope: Envelope);
}

#[async_trait]
impl SignalListener for mpsc::Sender<Envelope> {
    async fn on_signal(&self, envelope: Envelope) {
        if self.send(envelope).await.is_err() {
            trace!("signal listener channel closed");
        }
    }
}

/// State shared with the receive loop.
struct Shared {
    listener: RwLock<Option<Arc<dyn SignalListener>>>,
    events: broadcast::Sender<TransportEvent>,
    last_latency: AtomicI64,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

/// Outbound half: socket plus fixed destination.
struct Outbound {
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
}

/// A running receive loop.
struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
    endpoint: EndpointConfig,
}

/// One inbound and one outbound datagram socket towards the application.
///
/// Starts unbound. [`configure`](Self::configure) may be called any number
/// of times; each call replaces both sockets.
pub struct SignalTransport {
    shared: Arc<Shared>,
    outbound: RwLock<Option<Outbound>>,
    running: Mutex<Option<RunningLoop>>,
}

impl SignalTransport {
    /// Unbound transport.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                listener: RwLock::new(None),
                events,
                last_latency: AtomicI64::new(-1),
            }),
            outbound: RwLock::new(None),
            running: Mutex::new(None),
        }
    }

    /// Tear down the current sockets and bind new ones.
    ///
    /// The previous receive loop has exited and the listener is detached
    /// before this returns, whether or not the new bind succeeds. Callers
    /// re-install their listener afterwards.
    pub async fn configure(&self, endpoint: EndpointConfig) -> Result<SocketAddr, TransportError> {
        let mut running = self.running.lock().await;
        self.teardown(&mut running).await;

        let (inbound, local_addr, outbound) = match bind_pair(&endpoint).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(%endpoint, error = %e, "transport bind failed");
                self.shared.emit(TransportEvent::BindFailed {
                    endpoint,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let command_addr = outbound.dest;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(receive_loop(
            Arc::new(inbound),
            Arc::clone(&self.shared),
            cancel.clone(),
        ));
        *self.outbound.write() = Some(outbound);
        *running = Some(RunningLoop {
            cancel,
            handle,
            local_addr,
            endpoint,
        });

        info!(signal_addr = %local_addr, %command_addr, "transport bound");
        self.shared.emit(TransportEvent::Bound {
            signal_addr: local_addr,
            command_addr,
        });
        Ok(local_addr)
    }

    /// Stamp `fields` and send them to the command port.
    ///
    /// Returns the stamped envelope, or `None` when it could not be
    /// serialized. Delivery is reported through [`events`](Self::events).
    pub async fn send(&self, fields: Map<String, Value>) -> Option<Envelope> {
        let (envelope, bytes) = match codec::encode(fields) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound signal");
                return None;
            }
        };
        self.transmit(envelope.label(), &bytes).await;
        Some(envelope)
    }

    /// Send an already-stamped envelope unchanged.
    pub async fn send_raw(&self, envelope: &Envelope) {
        match codec::encode_raw(envelope) {
            Ok(bytes) => self.transmit(envelope.label(), &bytes).await,
            Err(e) => warn!(signal = envelope.label(), error = %e, "failed to encode raw envelope"),
        }
    }

    /// Install the single listener, replacing any previous one.
    pub fn on_signal(&self, listener: Arc<dyn SignalListener>) {
        *self.shared.listener.write() = Some(listener);
    }

    /// Detach the current listener.
    pub fn clear_listener(&self) {
        *self.shared.listener.write() = None;
    }

    /// Subscribe to transport events.
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    /// Most recent `now - sent` seen on an inbound envelope, `-1` if none.
    pub fn last_known_latency(&self) -> i64 {
        self.shared.last_latency.load(Ordering::Relaxed)
    }

    /// Local address of the inbound socket, if bound.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Endpoint of the current binding, if bound.
    pub async fn endpoint(&self) -> Option<EndpointConfig> {
        self.running.lock().await.as_ref().map(|r| r.endpoint.clone())
    }

    /// Whether a socket pair is currently bound.
    pub fn is_bound(&self) -> bool {
        self.outbound.read().is_some()
    }

    /// Stop the receive loop and release both sockets. Idempotent.
    pub async fn close(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            info!("closing transport");
        }
        self.teardown(&mut running).await;
    }

    async fn teardown(&self, running: &mut Option<RunningLoop>) {
        if let Some(current) = running.take() {
            current.cancel.cancel();
            if let Err(e) = current.handle.await {
                warn!(error = %e, "receive loop ended abnormally");
            }
        }
        self.clear_listener();
        *self.outbound.write() = None;
    }

    async fn transmit(&self, signal: &str, bytes: &[u8]) {
        let target = self
            .outbound
            .read()
            .as_ref()
            .map(|o| (Arc::clone(&o.socket), o.dest));
        let Some((socket, dest)) = target else {
            debug!(signal, "send with no bound transport");
            self.shared.emit(TransportEvent::SendFailed {
                signal: signal.to_string(),
                reason: "transport not configured".into(),
            });
            return;
        };

        match socket.send_to(bytes, dest).await {
            Ok(n) => {
                debug!(signal, %dest, bytes = n, "signal sent");
                self.shared.emit(TransportEvent::Sent {
                    signal: signal.to_string(),
                    bytes: n,
                });
            }
            Err(e) => {
                warn!(signal, %dest, error = %e, "signal send failed");
                self.shared.emit(TransportEvent::SendFailed {
                    signal: signal.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

impl Default for SignalTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn bind_pair(
    endpoint: &EndpointConfig,
) -> Result<(UdpSocket, SocketAddr, Outbound), TransportError> {
    endpoint.validate()?;
    let host = endpoint.host.as_str();

    let inbound_label = format!("{host}:{}", endpoint.signal_port);
    let inbound = UdpSocket::bind((host, endpoint.signal_port))
        .await
        .map_err(|source| TransportError::Bind {
            addr: inbound_label.clone(),
            source,
        })?;
    let local_addr = inbound.local_addr().map_err(|source| TransportError::Bind {
        addr: inbound_label,
        source,
    })?;

    let dest_label = format!("{host}:{}", endpoint.command_port);
    let dest = tokio::net::lookup_host((host, endpoint.command_port))
        .await
        .map_err(|source| TransportError::Resolve {
            addr: dest_label.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| TransportError::Resolve {
            addr: dest_label,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        })?;

    let socket = UdpSocket::bind((host, 0))
        .await
        .map_err(|source| TransportError::Bind {
            addr: format!("{host}:0"),
            source,
        })?;

    Ok((
        inbound,
        local_addr,
        Outbound {
            socket: Arc::new(socket),
            dest,
        },
    ))
}

async fn receive_loop(socket: Arc<UdpSocket>, shared: Arc<Shared>, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = socket.recv_from(&mut buf) => r,
        };

        let (len, from) = match received {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "datagram receive failed");
                shared.emit(TransportEvent::ReceiveFailed {
                    reason: e.to_string(),
                });
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(RECEIVE_BACKOFF) => continue,
                }
            }
        };

        let envelope = match codec::decode(&buf[..len]) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%from, bytes = len, error = %e, "dropping undecodable datagram");
                shared.emit(TransportEvent::DecodeFailed {
                    from,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if let Some(latency) = codec::observed_latency(&envelope, now_millis()) {
            shared.last_latency.store(latency, Ordering::Relaxed);
        }
        debug!(signal = envelope.label(), %from, "signal received");

        let listener = shared.listener.read().clone();
        match listener {
            Some(listener) => listener.on_signal(envelope).await,
            None => debug!(signal = envelope.label(), "no listener attached, dropping"),
        }
    }
    debug!("receive loop stopped");
}
