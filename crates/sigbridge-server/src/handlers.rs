//! Per-signal handlers that run on inbound datagrams before broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::{gauge, histogram};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use sigbridge_core::clock::now_millis;
use sigbridge_core::{Envelope, signals};
use sigbridge_latency::{AppSample, Recorded, SharedChain};
use sigbridge_transport::SignalTransport;
use tracing::{debug, info};

use crate::metrics::{APP_CHAIN_ALIVE, APP_ROUND_TRIP_MS};
use crate::protocol::ObserverEvent;
use crate::websocket::broadcast::ObserverSet;

/// Send time of the last `misc:ping` still waiting for its pong.
pub type OutstandingPing = Arc<Mutex<Option<i64>>>;

/// Reacts to one signal name.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    /// Handle an inbound envelope. `transport` is the socket pair it
    /// arrived on, for replies.
    async fn handle(&self, envelope: &Envelope, transport: &SignalTransport);
}

/// Signal name → handler. At most one handler per name.
#[derive(Default)]
pub struct SignalHandlers {
    table: RwLock<HashMap<String, Arc<dyn SignalHandler>>>,
}

impl SignalHandlers {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `signal`, returning the one it replaced.
    pub fn register(
        &self,
        signal: impl Into<String>,
        handler: Arc<dyn SignalHandler>,
    ) -> Option<Arc<dyn SignalHandler>> {
        self.table.write().insert(signal.into(), handler)
    }

    /// Remove the handler for `signal`.
    pub fn unregister(&self, signal: &str) -> Option<Arc<dyn SignalHandler>> {
        self.table.write().remove(signal)
    }

    /// Whether `signal` has a handler.
    pub fn contains(&self, signal: &str) -> bool {
        self.table.read().contains_key(signal)
    }

    /// Run the handler for the envelope's signal, if any. Returns whether
    /// one ran.
    pub async fn dispatch(&self, envelope: &Envelope, transport: &SignalTransport) -> bool {
        let handler = match envelope.signal.as_deref() {
            Some(signal) => self.table.read().get(signal).cloned(),
            None => None,
        };
        match handler {
            Some(handler) => {
                handler.handle(envelope, transport).await;
                true
            }
            None => false,
        }
    }
}

/// Answers `misc:ping` with a stamped `misc:pong`.
pub struct PingResponder;

#[async_trait]
impl SignalHandler for PingResponder {
    async fn handle(&self, _envelope: &Envelope, transport: &SignalTransport) {
        let mut pong = Map::new();
        let _ = pong.insert("signal".into(), Value::String(signals::PONG.into()));
        if transport.send(pong).await.is_some() {
            debug!("answered app ping");
        }
    }
}

/// Turns `misc:pong` into an app-chain sample.
pub struct PongRecorder {
    chain: SharedChain<AppSample>,
    outstanding: OutstandingPing,
    observers: Arc<ObserverSet>,
}

impl PongRecorder {
    /// Recorder writing into `chain` and announcing liveness to `observers`.
    pub fn new(
        chain: SharedChain<AppSample>,
        outstanding: OutstandingPing,
        observers: Arc<ObserverSet>,
    ) -> Self {
        Self {
            chain,
            outstanding,
            observers,
        }
    }

    /// Record a pong received at `now`.
    ///
    /// The pong is matched with the outstanding ping, which is consumed.
    /// Without one the chain is only marked seen. The app's `sent` is its
    /// response time; a pong without one counts as answered at `now`.
    pub fn on_pong(&self, envelope: &Envelope, now: i64) -> Option<Recorded<AppSample>> {
        let ping_sent = self.outstanding.lock().take();
        let (recorded, status) = {
            let mut chain = self.chain.lock();
            let recorded = ping_sent.map(|ping_sent| {
                chain.record(
                    AppSample {
                        ping_sent,
                        app_sent_resp_pong: envelope.sent.unwrap_or(now),
                        received_pong: now,
                    },
                    now,
                )
            });
            let transition = match &recorded {
                Some(r) => r.transition,
                None => chain.mark_seen(now),
            };
            (recorded, transition.map(|_| chain.status()))
        };

        if let Some(r) = &recorded {
            histogram!(APP_ROUND_TRIP_MS).record(r.sample.round_trip() as f64);
        } else {
            debug!("pong without outstanding ping");
        }
        if let Some(status) = status {
            info!("app chain alive");
            gauge!(APP_CHAIN_ALIVE).set(1.0);
            let _ = self.observers.broadcast(&ObserverEvent::Status(status));
        }
        recorded
    }
}

#[async_trait]
impl SignalHandler for PongRecorder {
    async fn handle(&self, envelope: &Envelope, _transport: &SignalTransport) {
        let _ = self.on_pong(envelope, now_millis());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sigbridge_latency::{ChainKind, ChainState};
    use tokio::sync::mpsc;

    use super::*;
    use crate::websocket::connection::ObserverConnection;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl SignalHandler for Counting {
        async fn handle(&self, _envelope: &Envelope, _transport: &SignalTransport) {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recorder() -> (PongRecorder, OutstandingPing, mpsc::Receiver<Arc<str>>) {
        let chain = ChainState::<AppSample>::new(ChainKind::App, 50, 1000, 3000).shared();
        let outstanding = OutstandingPing::default();
        let observers = Arc::new(ObserverSet::new());
        let (tx, rx) = mpsc::channel(8);
        observers.add(Arc::new(ObserverConnection::new("o".into(), tx)));
        (
            PongRecorder::new(chain, Arc::clone(&outstanding), observers),
            outstanding,
            rx,
        )
    }

    fn pong(sent: i64) -> Envelope {
        let mut env = Envelope::new(signals::PONG);
        env.protocol = Some(1);
        env.sent = Some(sent);
        env
    }

    #[tokio::test]
    async fn dispatch_runs_registered_handler() {
        let handlers = SignalHandlers::new();
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        assert!(handlers.register("console:log", counter.clone()).is_none());
        let transport = SignalTransport::new();

        assert!(handlers.dispatch(&Envelope::new("console:log"), &transport).await);
        assert!(!handlers.dispatch(&Envelope::new("net:start"), &transport).await);
        assert!(!handlers.dispatch(&Envelope::default(), &transport).await);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn register_overwrites() {
        let handlers = SignalHandlers::new();
        let first = Arc::new(Counting(AtomicUsize::new(0)));
        let second = Arc::new(Counting(AtomicUsize::new(0)));
        let _ = handlers.register("x", first.clone());
        assert!(handlers.register("x", second.clone()).is_some());

        let transport = SignalTransport::new();
        let _ = handlers.dispatch(&Envelope::new("x"), &transport).await;
        assert_eq!(first.0.load(Ordering::SeqCst), 0);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);

        assert!(handlers.unregister("x").is_some());
        assert!(!handlers.contains("x"));
    }

    #[test]
    fn pong_records_three_timestamp_sample() {
        let (recorder, outstanding, mut rx) = recorder();
        *outstanding.lock() = Some(1000);

        let recorded = recorder.on_pong(&pong(1050), 1100).unwrap();
        assert_eq!(recorded.sample.round_trip(), 100);
        assert_eq!(recorded.sample.request_plus_processing(), 50);
        assert_eq!(recorded.sample.response_leg(), 50);
        assert_eq!(recorded.transition, Some(true));
        assert!(outstanding.lock().is_none());

        let frame = rx.try_recv().unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["event"], "status");
        assert_eq!(v["alive"], true);
        assert_eq!(v["averages"]["roundTrip"], 100.0);
    }

    #[test]
    fn second_pong_is_quiet() {
        let (recorder, outstanding, mut rx) = recorder();
        *outstanding.lock() = Some(1000);
        let _ = recorder.on_pong(&pong(1050), 1100);
        let _ = rx.try_recv();

        *outstanding.lock() = Some(2000);
        let recorded = recorder.on_pong(&pong(2010), 2020).unwrap();
        assert_eq!(recorded.transition, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unmatched_pong_only_marks_seen() {
        let (recorder, _outstanding, mut rx) = recorder();
        assert!(recorder.on_pong(&pong(1050), 1100).is_none());
        assert_eq!(recorder.chain.lock().window().len(), 0);
        assert!(recorder.chain.lock().is_alive());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn skewed_pong_is_clamped() {
        let (recorder, outstanding, _rx) = recorder();
        *outstanding.lock() = Some(1000);
        // app clock behind the hub
        let recorded = recorder.on_pong(&pong(900), 1100).unwrap();
        assert_eq!(recorded.sample.app_sent_resp_pong, 1000);
        assert_eq!(recorded.sample.round_trip(), 100);
    }
}
