//! The signal envelope: a fixed base record plus an ordered bag of
//! application fields.
//!
//! Wire form is a flat JSON object. `protocol`, `sent`, and `signal` are
//! reserved; every other key lands in [`Envelope::extra`] and is carried
//! verbatim, in its original order, through decode and broadcast.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{DecodeError, json_type_name};
use crate::signals;

/// Envelope protocol version stamped by this bridge.
pub const PROTOCOL_VERSION: i64 = 1;

/// A decoded or stamped signal message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Envelope {
    /// Protocol version of the sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<i64>,
    /// Send time in epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<i64>,
    /// Signal name, e.g. `misc:ping`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// All non-reserved fields, in wire order.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Unstamped envelope for `signal`.
    pub fn new(signal: impl Into<String>) -> Self {
        Self {
            signal: Some(signal.into()),
            ..Self::default()
        }
    }

    /// Builder-style extra field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.extra.insert(key.into(), value);
        self
    }

    /// Build from caller-supplied fields without validation.
    ///
    /// `protocol` and `sent` are always lifted out of the bag (and kept only
    /// when they are integers) so that stamping can never produce duplicate
    /// keys. A non-string `signal` stays in `extra` untouched.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        let mut envelope = Self::default();
        for (key, value) in fields {
            match key.as_str() {
                "protocol" => envelope.protocol = value.as_i64(),
                "sent" => envelope.sent = number_as_millis(&value),
                "signal" if value.is_string() => {
                    envelope.signal = value.as_str().map(str::to_owned);
                }
                _ => {
                    let _ = envelope.extra.insert(key, value);
                }
            }
        }
        envelope
    }

    /// Signal name for logging; falls back to `[no signal]`.
    pub fn label(&self) -> &str {
        self.signal.as_deref().unwrap_or(signals::NO_SIGNAL)
    }

    /// Whether this envelope carries `signal`.
    pub fn is(&self, signal: &str) -> bool {
        self.signal.as_deref() == Some(signal)
    }

    /// Look up an extra field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Whether both `protocol` and `sent` are present.
    pub fn is_stamped(&self) -> bool {
        self.protocol.is_some() && self.sent.is_some()
    }
}

impl TryFrom<Map<String, Value>> for Envelope {
    type Error = DecodeError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut envelope = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "protocol" => {
                    if !value.is_null() {
                        envelope.protocol = Some(value.as_i64().ok_or(
                            DecodeError::InvalidField {
                                field: "protocol",
                                expected: "an integer",
                            },
                        )?);
                    }
                }
                "sent" => {
                    if !value.is_null() {
                        envelope.sent = Some(number_as_millis(&value).ok_or(
                            DecodeError::InvalidField {
                                field: "sent",
                                expected: "a number",
                            },
                        )?);
                    }
                }
                "signal" => match value {
                    Value::Null => {}
                    Value::String(s) => envelope.signal = Some(s),
                    _ => {
                        return Err(DecodeError::InvalidField {
                            field: "signal",
                            expected: "a string",
                        });
                    }
                },
                _ => {
                    let _ = envelope.extra.insert(key, value);
                }
            }
        }
        Ok(envelope)
    }
}

impl TryFrom<Value> for Envelope {
    type Error = DecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Self::try_from(map),
            other => Err(DecodeError::NotAnObject(json_type_name(&other))),
        }
    }
}

/// Integer millis, truncating fractional senders.
fn number_as_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}
