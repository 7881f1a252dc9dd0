//! Envelope codec errors.

use thiserror::Error;

/// A datagram or relay payload could not be turned into an [`Envelope`].
///
/// Receivers log and drop on any of these; none is fatal.
///
/// [`Envelope`]: crate::Envelope
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload bytes are not UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// Payload is not JSON.
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Payload is JSON but not an object.
    #[error("envelope must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    /// A reserved envelope field has the wrong type.
    #[error("envelope field `{field}` must be {expected}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Human-readable expected type.
        expected: &'static str,
    },
}

/// An envelope could not be serialized.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// JSON serialization failed.
    #[error("failed to serialize envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Short JSON type name for error messages.
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
