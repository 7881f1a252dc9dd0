//! Envelope codec.
//!
//! Outbound messages go through [`encode`], which stamps `protocol` and
//! `sent` onto a shallow copy of the caller's fields. [`encode_raw`] is the
//! bypass path for envelopes that were stamped upstream and must keep their
//! original `sent` for round-trip math.

use serde_json::{Map, Value};

use crate::clock::now_millis;
use crate::envelope::{Envelope, PROTOCOL_VERSION};
use crate::errors::{DecodeError, EncodeError};

/// Stamp `protocol` and `sent = now` onto `fields`.
///
/// Stamping overrides any caller-provided `protocol`/`sent`.
pub fn stamp(fields: Map<String, Value>, now: i64) -> Envelope {
    let mut envelope = Envelope::from_fields(fields);
    envelope.protocol = Some(PROTOCOL_VERSION);
    envelope.sent = Some(now);
    envelope
}

/// Stamp with the current time and serialize.
pub fn encode(fields: Map<String, Value>) -> Result<(Envelope, Vec<u8>), EncodeError> {
    let envelope = stamp(fields, now_millis());
    let bytes = encode_raw(&envelope)?;
    Ok((envelope, bytes))
}

/// Serialize without stamping.
pub fn encode_raw(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Parse a datagram or relay payload.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let text = std::str::from_utf8(bytes)?;
    let value: Value = serde_json::from_str(text)?;
    Envelope::try_from(value)
}

/// `now - sent`, when the envelope carries a send stamp.
///
/// Informational only: the sender's clock is not assumed to be in sync.
/// `None` when the difference does not fit in an `i64`.
pub fn observed_latency(envelope: &Envelope, now: i64) -> Option<i64> {
    envelope.sent.and_then(|sent| now.checked_sub(sent))
}
