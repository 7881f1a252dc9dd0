//! Server-chain probe: `ack_request` on a timer.

use async_trait::async_trait;
use serde_json::Map;
use sigbridge_core::clock::now_millis;
use sigbridge_latency::ProbeEmitter;
use sigbridge_server::ObserverCommand;
use tokio::sync::mpsc;
use tracing::debug;

/// Emits `ack_request` frames stamped with the current time.
pub struct ServerProbe {
    commands: mpsc::Sender<String>,
}

impl ServerProbe {
    /// Probe writing into the client's outbound queue.
    pub fn new(commands: mpsc::Sender<String>) -> Self {
        Self { commands }
    }

    /// The frame for one probe sent at `now`.
    pub fn request(now: i64) -> ObserverCommand {
        ObserverCommand::AckRequest {
            requested: now,
            request: Map::new(),
        }
    }
}

#[async_trait]
impl ProbeEmitter for ServerProbe {
    async fn emit_probe(&self) {
        let frame = Self::request(now_millis()).to_value().to_string();
        if self.commands.send(frame).await.is_err() {
            debug!("server probe skipped, connection closed");
        }
    }
}
