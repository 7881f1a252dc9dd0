//! Observer command errors.

use sigbridge_core::DecodeError;
use sigbridge_transport::TransportError;
use thiserror::Error;

/// Why an observer command was not carried out.
///
/// Every variant except [`Malformed`](Self::Malformed) is answered with a
/// `rejected` event sent to the issuing observer only.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Not JSON, not an object, or no string `event` key. Dropped.
    #[error("malformed observer message: {0}")]
    Malformed(String),
    /// `event` names no known command.
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    /// Parameters did not match the command's shape.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    /// The command needs a transport and none has been constructed.
    #[error("no transport; send `construct` first")]
    NoTransport,
    /// `send_constructed` payload is not a valid envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] DecodeError),
    /// Binding the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl CommandError {
    /// Whether the issuer gets a `rejected` reply.
    pub fn is_replied(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }

    /// Metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnknownCommand(_) => "unknown_command",
            Self::InvalidParams(_) => "invalid_params",
            Self::NoTransport => "no_transport",
            Self::InvalidEnvelope(_) => "invalid_envelope",
            Self::Transport(_) => "transport",
        }
    }
}
