//! Non-fatal transport notifications.

use std::net::SocketAddr;

use serde::Serialize;

use crate::endpoint::EndpointConfig;

/// Published on the transport's event channel.
///
/// Subscribers that lag simply miss events; the transport never waits on them.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportEvent {
    /// Both sockets are bound and the receive loop is running.
    Bound {
        /// Local address of the inbound socket.
        signal_addr: SocketAddr,
        /// Resolved command destination.
        command_addr: SocketAddr,
    },
    /// `configure` failed; the transport is unbound.
    BindFailed {
        /// Endpoint that was attempted.
        endpoint: EndpointConfig,
        /// Error text.
        reason: String,
    },
    /// A datagram left the outbound socket.
    Sent {
        /// Signal label of the envelope.
        signal: String,
        /// Payload size.
        bytes: usize,
    },
    /// A datagram could not be sent.
    SendFailed {
        /// Signal label of the envelope.
        signal: String,
        /// Error text.
        reason: String,
    },
    /// An inbound datagram was dropped because it did not decode.
    DecodeFailed {
        /// Sender address.
        from: SocketAddr,
        /// Error text.
        reason: String,
    },
    /// The inbound socket returned an error.
    ReceiveFailed {
        /// Error text.
        reason: String,
    },
}

impl TransportEvent {
    /// Short name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bound { .. } => "bound",
            Self::BindFailed { .. } => "bind_failed",
            Self::Sent { .. } => "sent",
            Self::SendFailed { .. } => "send_failed",
            Self::DecodeFailed { .. } => "decode_failed",
            Self::ReceiveFailed { .. } => "receive_failed",
        }
    }
}
