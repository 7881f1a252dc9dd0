//! Observer client errors.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors from [`ObserverClient`](crate::ObserverClient).
#[derive(Debug, Error)]
pub enum ObserverError {
    /// Connecting or talking to the hub failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),
    /// The connection is gone; no more commands can be sent.
    #[error("observer connection closed")]
    Closed,
}

impl From<tungstenite::Error> for ObserverError {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
