//! The relay hub: one transport, many observers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use sigbridge_core::clock::now_millis;
use sigbridge_core::{Envelope, signals};
use sigbridge_latency::{
    AppAverages, AppSample, ChainKind, ChainState, ChainStatus, ProbeEmitter, ProbeScheduler,
    SharedChain, run_staleness_watch,
};
use sigbridge_transport::{EndpointConfig, SignalListener, SignalTransport, TransportEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::HubConfig;
use crate::errors::CommandError;
use crate::handlers::{OutstandingPing, PingResponder, PongRecorder, SignalHandlers};
use crate::metrics::{
    APP_CHAIN_ALIVE, COMMAND_REJECTIONS_TOTAL, COMMANDS_TOTAL, SIGNALS_RECEIVED_TOTAL,
    TRANSPORT_EVENTS_TOTAL,
};
use crate::protocol::{
    ConfigureParams, ConstructParams, ObserverCommand, ObserverEvent, ProbeParams, split_event,
};
use crate::websocket::broadcast::ObserverSet;
use crate::websocket::connection::ObserverConnection;

/// Owns the transport slot, the observer set, and the app probe chain.
///
/// Observers come and go without affecting the transport. The transport is
/// created by the first `construct` and lives until [`close`](Self::close).
pub struct RelayHub {
    config: HubConfig,
    observers: Arc<ObserverSet>,
    transport: RwLock<Option<Arc<SignalTransport>>>,
    handlers: SignalHandlers,
    app_chain: SharedChain<AppSample>,
    outstanding: OutstandingPing,
    app_probe: ProbeScheduler,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    this: Weak<RelayHub>,
}

impl RelayHub {
    /// Build the hub and start its staleness watch. Must run inside a tokio
    /// runtime. `shutdown` cancels every hub task.
    pub fn new(config: HubConfig, shutdown: &CancellationToken) -> Arc<Self> {
        let cancel = shutdown.child_token();
        let observers = Arc::new(ObserverSet::new());
        let chain_cfg = &config.app_chain;
        let app_chain = ChainState::<AppSample>::new(
            ChainKind::App,
            chain_cfg.capacity,
            chain_cfg.interval.as_millis() as u64,
            chain_cfg.timeout_ms,
        )
        .shared();
        let outstanding = OutstandingPing::default();

        let hub = Arc::new_cyclic(|this: &Weak<RelayHub>| {
            let emitter = Arc::new(AppProbe { hub: this.clone() });
            Self {
                app_probe: ProbeScheduler::new(ChainKind::App.as_str(), emitter, cancel.clone()),
                handlers: SignalHandlers::new(),
                transport: RwLock::new(None),
                observers: Arc::clone(&observers),
                app_chain: Arc::clone(&app_chain),
                outstanding: Arc::clone(&outstanding),
                cancel: cancel.clone(),
                tasks: Mutex::new(Vec::new()),
                this: this.clone(),
                config,
            }
        });

        if hub.config.auto_pong {
            let _ = hub
                .handlers
                .register(signals::PING, Arc::new(PingResponder));
        }
        let _ = hub.handlers.register(
            signals::PONG,
            Arc::new(PongRecorder::new(
                Arc::clone(&app_chain),
                outstanding,
                Arc::clone(&observers),
            )),
        );

        hub.spawn_staleness_watch();
        if hub.config.app_chain.enabled {
            hub.app_chain.lock().set_enabled(true);
            hub.app_probe.enable(hub.config.app_chain.interval);
        }
        hub
    }

    /// Connected observers.
    pub fn observers(&self) -> &Arc<ObserverSet> {
        &self.observers
    }

    /// Signal handler table. Built-in handlers for `misc:ping` and
    /// `misc:pong` are installed at construction and may be replaced.
    pub fn handlers(&self) -> &SignalHandlers {
        &self.handlers
    }

    /// Current transport, if constructed.
    pub fn transport(&self) -> Option<Arc<SignalTransport>> {
        self.transport.read().clone()
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// App chain snapshot.
    pub fn app_status(&self) -> ChainStatus<AppAverages> {
        self.app_chain.lock().status()
    }

    /// Parse and run one observer frame. Replies, if any, go to `observer`
    /// only.
    #[instrument(skip_all, fields(observer = %observer.id))]
    pub async fn handle_command(&self, observer: &ObserverConnection, text: &str) {
        let received = now_millis();
        let (name, frame) = match split_event(text) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "dropping observer message");
                counter!(COMMAND_REJECTIONS_TOTAL, "error_type" => e.kind()).increment(1);
                return;
            }
        };

        let result = match ObserverCommand::from_parts(&name, frame) {
            Ok(command) => {
                counter!(COMMANDS_TOTAL, "command" => command.name()).increment(1);
                debug!(command = command.name(), "observer command");
                self.execute(command, received).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(reply)) => {
                if !observer.send_event(&reply) {
                    warn!(reply = reply.name(), "failed to queue reply");
                }
            }
            Ok(None) => {}
            Err(e) => {
                counter!(COMMAND_REJECTIONS_TOTAL, "error_type" => e.kind()).increment(1);
                warn!(command = %name, error = %e, "command rejected");
                if !observer.send_event(&ObserverEvent::Rejected {
                    command: name,
                    reason: e.to_string(),
                }) {
                    warn!(reply = "rejected", "failed to queue reply");
                }
            }
        }
    }

    async fn execute(
        &self,
        command: ObserverCommand,
        received: i64,
    ) -> Result<Option<ObserverEvent>, CommandError> {
        match command {
            ObserverCommand::Construct(params) => self.construct(params).await.map(Some),
            ObserverCommand::Configure(params) => self.configure(params).await.map(Some),
            ObserverCommand::Send { msg } => {
                let transport = self.transport().ok_or(CommandError::NoTransport)?;
                let _ = transport.send(msg).await;
                Ok(None)
            }
            ObserverCommand::SendConstructed { msg } => {
                let transport = self.transport().ok_or(CommandError::NoTransport)?;
                transport.send_raw(&msg).await;
                Ok(None)
            }
            ObserverCommand::AckRequest { request, .. } => Ok(Some(ObserverEvent::Ack {
                received,
                responded: now_millis(),
                request,
            })),
            ObserverCommand::Probe(params) => self.probe(&params).map(Some),
            ObserverCommand::Status => Ok(Some(ObserverEvent::Status(self.app_status()))),
        }
    }

    /// Create the transport if needed and bind it. Omitted fields come from
    /// the configured default endpoint.
    pub async fn construct(&self, params: ConstructParams) -> Result<ObserverEvent, CommandError> {
        let defaults = &self.config.default_endpoint;
        let endpoint = EndpointConfig::new(
            params.host.unwrap_or_else(|| defaults.host.clone()),
            params.signal_port.unwrap_or(defaults.signal_port),
            params.command_port.unwrap_or(defaults.command_port),
        );
        endpoint.validate()?;

        let (transport, created) = {
            let mut slot = self.transport.write();
            match slot.as_ref() {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let transport = Arc::new(SignalTransport::new());
                    *slot = Some(Arc::clone(&transport));
                    (transport, true)
                }
            }
        };
        if created {
            info!("transport constructed");
            self.spawn_event_counter(&transport);
        }
        self.bind(&transport, endpoint).await
    }

    /// Rebind the existing transport. An omitted host keeps the current one.
    pub async fn configure(&self, params: ConfigureParams) -> Result<ObserverEvent, CommandError> {
        let transport = self.transport().ok_or(CommandError::NoTransport)?;
        let host = match params.host {
            Some(host) => host,
            None => transport
                .endpoint()
                .await
                .map_or_else(|| self.config.default_endpoint.host.clone(), |e| e.host),
        };
        let endpoint = EndpointConfig::new(host, params.signal_port, params.command_port);
        endpoint.validate()?;
        self.bind(&transport, endpoint).await
    }

    async fn bind(
        &self,
        transport: &Arc<SignalTransport>,
        endpoint: EndpointConfig,
    ) -> Result<ObserverEvent, CommandError> {
        let signal_addr = transport.configure(endpoint.clone()).await?;
        transport.on_signal(Arc::new(HubListener {
            hub: self.this.clone(),
            transport: Arc::downgrade(transport),
        }));
        Ok(ObserverEvent::Configured {
            host: endpoint.host,
            signal_addr: signal_addr.to_string(),
            command_port: endpoint.command_port,
        })
    }

    /// Apply a `probe` command to the app chain and return its status.
    pub fn probe(&self, params: &ProbeParams) -> Result<ObserverEvent, CommandError> {
        if params.interval_ms == Some(0) {
            return Err(CommandError::InvalidParams(
                "`intervalMs` must be positive".into(),
            ));
        }

        let (enabled, interval) = {
            let mut chain = self.app_chain.lock();
            if let Some(timeout_ms) = params.timeout_ms {
                chain.set_timeout_ms(timeout_ms);
            }
            if let Some(interval_ms) = params.interval_ms {
                chain.set_interval_ms(interval_ms);
            }
            if let Some(enabled) = params.enabled {
                chain.set_enabled(enabled);
            }
            (
                chain.enabled(),
                Duration::from_millis(chain.interval_ms()),
            )
        };

        if !enabled {
            self.app_probe.disable();
        } else if params.enabled == Some(true) || !self.app_probe.is_enabled() {
            self.app_probe.enable(interval);
        } else if params.interval_ms.is_some() {
            let _ = self.app_probe.set_interval(interval);
        }
        Ok(ObserverEvent::Status(self.app_status()))
    }

    /// Run the handler for an inbound envelope, then broadcast it.
    async fn on_datagram(&self, envelope: Envelope, transport: &SignalTransport) {
        counter!(SIGNALS_RECEIVED_TOTAL, "signal" => envelope.label().to_string()).increment(1);
        let _ = self.handlers.dispatch(&envelope, transport).await;
        let delivered = self.observers.broadcast(&ObserverEvent::Receive { msg: envelope });
        trace!(delivered, "datagram relayed");
    }

    async fn emit_app_ping(&self) {
        let Some(transport) = self.transport() else {
            trace!("app probe skipped, no transport");
            return;
        };
        let mut ping = Map::new();
        let _ = ping.insert("signal".into(), Value::String(signals::PING.into()));
        if let Some(sent) = transport.send(ping).await.and_then(|e| e.sent) {
            *self.outstanding.lock() = Some(sent);
        }
    }

    fn spawn_staleness_watch(&self) {
        let observers = Arc::clone(&self.observers);
        let handle = tokio::spawn(run_staleness_watch(
            Arc::clone(&self.app_chain),
            self.config.staleness_tick,
            self.cancel.clone(),
            move |status| {
                info!("app chain stale");
                gauge!(APP_CHAIN_ALIVE).set(0.0);
                let _ = observers.broadcast(&ObserverEvent::Status(status));
                std::future::ready(())
            },
        ));
        self.tasks.lock().push(handle);
    }

    fn spawn_event_counter(&self, transport: &SignalTransport) {
        let mut events = transport.events();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            counter!(TRANSPORT_EVENTS_TOTAL, "kind" => event.kind()).increment(1);
                            if let TransportEvent::SendFailed { signal, reason } = &event {
                                debug!(signal, reason, "send failed");
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "transport event counter lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Stop probing and the staleness watch, then close the transport.
    /// Observers stay connected.
    pub async fn close(&self) {
        self.app_probe.disable();
        self.cancel.cancel();
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "hub task ended abnormally");
            }
        }
        info!("relay hub closed");
    }
}

impl Drop for RelayHub {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Installed on the transport after every bind.
struct HubListener {
    hub: Weak<RelayHub>,
    transport: Weak<SignalTransport>,
}

#[async_trait]
impl SignalListener for HubListener {
    async fn on_signal(&self, envelope: Envelope) {
        let (Some(hub), Some(transport)) = (self.hub.upgrade(), self.transport.upgrade()) else {
            return;
        };
        hub.on_datagram(envelope, &transport).await;
    }
}

/// Sends `misc:ping` for the app chain.
struct AppProbe {
    hub: Weak<RelayHub>,
}

#[async_trait]
impl ProbeEmitter for AppProbe {
    async fn emit_probe(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.emit_app_ping().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::net::UdpSocket;
    use tokio::sync::mpsc;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn hub() -> (Arc<RelayHub>, CancellationToken) {
        let shutdown = CancellationToken::new();
        (RelayHub::new(HubConfig::default(), &shutdown), shutdown)
    }

    fn observer(id: &str) -> (Arc<ObserverConnection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(32);
        (Arc::new(ObserverConnection::new(id.into(), tx)), rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<Arc<str>>) -> serde_json::Value {
        let frame = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    async fn construct_ephemeral(hub: &RelayHub) -> (std::net::SocketAddr, UdpSocket) {
        let app = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reply = hub
            .construct(ConstructParams {
                host: Some("127.0.0.1".into()),
                signal_port: Some(0),
                command_port: Some(app.local_addr().unwrap().port()),
            })
            .await
            .unwrap();
        let ObserverEvent::Configured { signal_addr, .. } = reply else {
            panic!("expected configured");
        };
        (signal_addr.parse().unwrap(), app)
    }

    #[tokio::test]
    async fn send_without_transport_is_rejected() {
        let (hub, _) = hub();
        let (obs, mut rx) = observer("o1");
        hub.handle_command(&obs, r#"{"event":"send","msg":{"signal":"console:in"}}"#)
            .await;
        let v = next_event(&mut rx).await;
        assert_eq!(v["event"], "rejected");
        assert_eq!(v["command"], "send");
    }

    #[tokio::test]
    async fn configure_without_transport_is_rejected() {
        let (hub, _) = hub();
        let err = hub
            .configure(ConfigureParams {
                host: None,
                signal_port: 0,
                command_port: 9001,
            })
            .await
            .unwrap_err();
        assert_matches!(err, CommandError::NoTransport);
    }

    #[tokio::test]
    async fn malformed_message_gets_no_reply() {
        let (hub, _) = hub();
        let (obs, mut rx) = observer("o1");
        hub.handle_command(&obs, "not json").await;
        hub.handle_command(&obs, r#"{"no":"event"}"#).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_command_is_rejected_by_name() {
        let (hub, _) = hub();
        let (obs, mut rx) = observer("o1");
        hub.handle_command(&obs, r#"{"event":"explode"}"#).await;
        let v = next_event(&mut rx).await;
        assert_eq!(v["event"], "rejected");
        assert_eq!(v["command"], "explode");
    }

    #[tokio::test]
    async fn rejection_to_full_queue_is_dropped_and_counted() {
        let (hub, _) = hub();
        let (tx, mut rx) = mpsc::channel(1);
        let obs = ObserverConnection::new("slow".into(), tx);
        assert!(obs.send(Arc::from("{\"event\":\"filler\"}")));

        hub.handle_command(&obs, r#"{"event":"explode"}"#).await;

        assert_eq!(obs.drop_count(), 1);
        assert_eq!(next_event(&mut rx).await["event"], "filler");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ack_echoes_request_with_ordered_stamps() {
        let (hub, _) = hub();
        let (obs, mut rx) = observer("o1");
        let requested = now_millis();
        let frame = serde_json::json!({"event": "ack_request", "requested": requested, "seq": 3});
        hub.handle_command(&obs, &frame.to_string()).await;
        let v = next_event(&mut rx).await;
        assert_eq!(v["event"], "ack");
        assert_eq!(v["request"]["seq"], 3);
        assert_eq!(v["request"]["requested"], requested);
        assert!(v["responded"].as_i64().unwrap() >= v["received"].as_i64().unwrap());
    }

    #[tokio::test]
    async fn datagram_is_broadcast_to_every_observer() {
        let (hub, _) = hub();
        let (a, mut ra) = observer("a");
        let (b, mut rb) = observer("b");
        hub.observers().add(a);
        hub.observers().add(b);

        let (signal_addr, app) = construct_ephemeral(&hub).await;
        let _ = app
            .send_to(br#"{"protocol":1,"sent":5,"signal":"console:log","text":"hi"}"#, signal_addr)
            .await
            .unwrap();

        let va = next_event(&mut ra).await;
        let vb = next_event(&mut rb).await;
        assert_eq!(va, vb);
        assert_eq!(va["event"], "receive");
        assert_eq!(va["msg"]["text"], "hi");
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (hub, _) = hub();
        let (signal_addr, app) = construct_ephemeral(&hub).await;
        let _ = app
            .send_to(br#"{"protocol":1,"sent":5,"signal":"misc:ping"}"#, signal_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let (n, _) = tokio::time::timeout(WAIT, app.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let pong = sigbridge_core::codec::decode(&buf[..n]).unwrap();
        assert!(pong.is(signals::PONG));
        assert!(pong.is_stamped());
    }

    #[tokio::test]
    async fn reconstruct_reuses_transport_and_keeps_relaying() {
        let (hub, _) = hub();
        let (obs, mut rx) = observer("o");
        hub.observers().add(obs);

        let _ = construct_ephemeral(&hub).await;
        let first = hub.transport().unwrap();
        let (signal_addr, app) = construct_ephemeral(&hub).await;
        assert!(Arc::ptr_eq(&first, &hub.transport().unwrap()));

        let _ = app
            .send_to(br#"{"signal":"net:start"}"#, signal_addr)
            .await
            .unwrap();
        let v = next_event(&mut rx).await;
        assert_eq!(v["msg"]["signal"], "net:start");
    }

    #[tokio::test]
    async fn configure_keeps_host() {
        let (hub, _) = hub();
        let _ = construct_ephemeral(&hub).await;
        let reply = hub
            .configure(ConfigureParams {
                host: None,
                signal_port: 0,
                command_port: 9001,
            })
            .await
            .unwrap();
        assert_matches!(reply, ObserverEvent::Configured { host, command_port: 9001, .. } if host == "127.0.0.1");
    }

    #[tokio::test]
    async fn probe_toggles_scheduler_and_reports_status() {
        let (hub, _) = hub();
        let reply = hub
            .probe(&ProbeParams {
                enabled: Some(true),
                interval_ms: Some(250),
                timeout_ms: Some(-1),
            })
            .unwrap();
        let ObserverEvent::Status(status) = reply else {
            panic!("expected status");
        };
        assert!(status.enabled);
        assert_eq!(status.interval_ms, 250);
        assert_eq!(status.timeout_ms, -1);
        assert!(hub.app_probe.is_enabled());

        let _ = hub
            .probe(&ProbeParams {
                enabled: Some(false),
                ..ProbeParams::default()
            })
            .unwrap();
        assert!(!hub.app_probe.is_enabled());
        assert!(!hub.app_status().enabled);
    }

    #[tokio::test]
    async fn zero_interval_is_invalid() {
        let (hub, _) = hub();
        let err = hub
            .probe(&ProbeParams {
                interval_ms: Some(0),
                ..ProbeParams::default()
            })
            .unwrap_err();
        assert_matches!(err, CommandError::InvalidParams(_));
    }

    #[tokio::test]
    async fn app_probe_records_round_trip() {
        let (hub, _) = hub();
        let (signal_addr, app) = construct_ephemeral(&hub).await;
        let _ = hub
            .probe(&ProbeParams {
                enabled: Some(true),
                interval_ms: Some(20),
                timeout_ms: None,
            })
            .unwrap();

        // fake app answering every ping
        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                let (n, _) = app.recv_from(&mut buf).await.unwrap();
                let ping = sigbridge_core::codec::decode(&buf[..n]).unwrap();
                assert!(ping.is(signals::PING));
                let pong =
                    serde_json::json!({"protocol": 1, "sent": now_millis(), "signal": "misc:pong"});
                let _ = app
                    .send_to(pong.to_string().as_bytes(), signal_addr)
                    .await
                    .unwrap();
            }
        });

        tokio::time::timeout(WAIT, async {
            while hub.app_status().samples == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        responder.abort();
        let status = hub.app_status();
        assert!(status.alive);
        assert!(status.averages.is_some());
    }

    #[tokio::test]
    async fn pong_after_disable_is_still_recorded() {
        let (hub, _) = hub();
        let (signal_addr, app) = construct_ephemeral(&hub).await;
        let ping_sent = now_millis() - 30;
        *hub.outstanding.lock() = Some(ping_sent);

        let _ = hub
            .probe(&ProbeParams {
                enabled: Some(false),
                ..ProbeParams::default()
            })
            .unwrap();
        assert!(!hub.app_probe.is_enabled());
        assert_eq!(hub.app_status().last_seen, None);

        let pong = serde_json::json!({"protocol": 1, "sent": ping_sent + 10, "signal": "misc:pong"});
        let _ = app
            .send_to(pong.to_string().as_bytes(), signal_addr)
            .await
            .unwrap();

        tokio::time::timeout(WAIT, async {
            while hub.app_status().samples == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let status = hub.app_status();
        assert_eq!(status.samples, 1);
        assert!(!status.enabled);
        assert!(status.last_seen.is_some_and(|seen| seen >= ping_sent));
        assert!(hub.outstanding.lock().is_none());
    }

    #[tokio::test]
    async fn close_releases_transport() {
        let (hub, _) = hub();
        let _ = construct_ephemeral(&hub).await;
        hub.close().await;
        assert!(hub.transport().is_none());
        let (obs, mut rx) = observer("o");
        hub.handle_command(&obs, r#"{"event":"send_constructed","msg":{"signal":"x"}}"#)
            .await;
        let v = next_event(&mut rx).await;
        assert_eq!(v["event"], "rejected");
    }
}
