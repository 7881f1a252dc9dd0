//! Observer wire protocol.
//!
//! Every frame is a JSON object with an `event` discriminator, in both
//! directions. Commands are parsed in two steps so that a rejection can
//! always name the command it rejects: [`split_event`] finds the `event`
//! name, then [`ObserverCommand::from_parts`] validates the rest.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sigbridge_core::Envelope;
use sigbridge_latency::{AppAverages, ChainStatus};

use crate::errors::CommandError;

/// `construct` parameters. Omitted fields fall back to the hub defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructParams {
    /// Host for both sockets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Inbound port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_port: Option<u16>,
    /// Command destination port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_port: Option<u16>,
}

/// `configure` parameters. Ports are required; the host defaults to the
/// current one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureParams {
    /// Host for both sockets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Inbound port.
    pub signal_port: u16,
    /// Command destination port.
    pub command_port: u16,
}

/// `probe` parameters for the app chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeParams {
    /// Start or stop pinging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// New ping period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    /// New staleness timeout; negative never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
}

/// A validated observer command.
#[derive(Clone, Debug, PartialEq)]
pub enum ObserverCommand {
    /// Create the transport, or rebind it if it exists.
    Construct(ConstructParams),
    /// Rebind an existing transport.
    Configure(ConfigureParams),
    /// Stamp and send.
    Send {
        /// Signal fields.
        msg: Map<String, Value>,
    },
    /// Send as-is.
    SendConstructed {
        /// Pre-built envelope.
        msg: Envelope,
    },
    /// Server-chain probe.
    AckRequest {
        /// Observer send time.
        requested: i64,
        /// The whole request, echoed back in the ack.
        request: Map<String, Value>,
    },
    /// Retune the app chain.
    Probe(ProbeParams),
    /// Ask for the app chain status.
    Status,
}

impl ObserverCommand {
    /// Wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Construct(_) => "construct",
            Self::Configure(_) => "configure",
            Self::Send { .. } => "send",
            Self::SendConstructed { .. } => "send_constructed",
            Self::AckRequest { .. } => "ack_request",
            Self::Probe(_) => "probe",
            Self::Status => "status",
        }
    }

    /// Validate the fields of a frame whose `event` is `event`.
    pub fn from_parts(event: &str, mut frame: Map<String, Value>) -> Result<Self, CommandError> {
        match event {
            "construct" => Ok(Self::Construct(optional_params(&mut frame)?)),
            "configure" => {
                let params = frame
                    .remove("params")
                    .ok_or_else(|| CommandError::InvalidParams("`params` is required".into()))?;
                Ok(Self::Configure(from_value(params)?))
            }
            "send" => Ok(Self::Send {
                msg: object_field(&mut frame, "msg")?,
            }),
            "send_constructed" => {
                let msg = object_field(&mut frame, "msg")?;
                Ok(Self::SendConstructed {
                    msg: Envelope::try_from(msg)?,
                })
            }
            "ack_request" => {
                let requested = frame
                    .get("requested")
                    .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
                    .ok_or_else(|| {
                        CommandError::InvalidParams("`requested` must be a number".into())
                    })?;
                Ok(Self::AckRequest {
                    requested,
                    request: frame,
                })
            }
            "probe" => Ok(Self::Probe(optional_params(&mut frame)?)),
            "status" => Ok(Self::Status),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }

    /// Parse a whole frame.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let (event, frame) = split_event(text)?;
        Self::from_parts(&event, frame)
    }

    /// Encode as an observer frame.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Construct(params) => json!({"event": self.name(), "params": params}),
            Self::Configure(params) => json!({"event": self.name(), "params": params}),
            Self::Send { msg } => json!({"event": self.name(), "msg": msg}),
            Self::SendConstructed { msg } => json!({"event": self.name(), "msg": msg}),
            Self::AckRequest { requested, request } => {
                let mut frame = request.clone();
                let _ = frame.insert("event".into(), Value::String(self.name().into()));
                let _ = frame.insert("requested".into(), Value::from(*requested));
                Value::Object(frame)
            }
            Self::Probe(params) => json!({"event": self.name(), "params": params}),
            Self::Status => json!({"event": self.name()}),
        }
    }
}

/// Parse a frame into its `event` name and the full object.
pub fn split_event(text: &str) -> Result<(String, Map<String, Value>), CommandError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| CommandError::Malformed(e.to_string()))?;
    let Value::Object(frame) = value else {
        return Err(CommandError::Malformed("frame is not a JSON object".into()));
    };
    match frame.get("event") {
        Some(Value::String(event)) => Ok((event.clone(), frame)),
        _ => Err(CommandError::Malformed("missing string `event`".into())),
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, CommandError> {
    serde_json::from_value(value).map_err(|e| CommandError::InvalidParams(e.to_string()))
}

fn optional_params<T>(frame: &mut Map<String, Value>) -> Result<T, CommandError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match frame.remove("params") {
        None | Some(Value::Null) => Ok(T::default()),
        Some(params) => from_value(params),
    }
}

fn object_field(
    frame: &mut Map<String, Value>,
    key: &'static str,
) -> Result<Map<String, Value>, CommandError> {
    match frame.remove(key) {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(CommandError::InvalidParams(format!("`{key}` must be an object"))),
    }
}

/// Hub → observer frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ObserverEvent {
    /// Sent once, right after the upgrade.
    Connected {
        /// Id assigned to this observer.
        observer_id: String,
    },
    /// An inbound datagram, broadcast to every observer.
    Receive {
        /// Decoded envelope.
        msg: Envelope,
    },
    /// Reply to `construct`/`configure`.
    Configured {
        /// Host of both sockets.
        host: String,
        /// Local address of the inbound socket.
        signal_addr: String,
        /// Command destination port.
        command_port: u16,
    },
    /// Reply to `ack_request`.
    Ack {
        /// Hub receipt time.
        received: i64,
        /// Hub reply time.
        responded: i64,
        /// The original request.
        request: Map<String, Value>,
    },
    /// App chain snapshot; also broadcast on liveness changes.
    Status(ChainStatus<AppAverages>),
    /// A command was refused. Sent to the issuer only.
    Rejected {
        /// Command name as sent.
        command: String,
        /// Error text.
        reason: String,
    },
}

impl ObserverEvent {
    /// Wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Receive { .. } => "receive",
            Self::Configured { .. } => "configured",
            Self::Ack { .. } => "ack",
            Self::Status(_) => "status",
            Self::Rejected { .. } => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sigbridge_latency::ChainKind;

    #[test]
    fn construct_without_params_uses_defaults() {
        let cmd = ObserverCommand::parse(r#"{"event":"construct"}"#).unwrap();
        assert_eq!(cmd, ObserverCommand::Construct(ConstructParams::default()));
    }

    #[test]
    fn construct_with_ports() {
        let cmd = ObserverCommand::parse(
            r#"{"event":"construct","params":{"signalPort":9000,"commandPort":9001}}"#,
        )
        .unwrap();
        assert_matches!(
            cmd,
            ObserverCommand::Construct(ConstructParams {
                host: None,
                signal_port: Some(9000),
                command_port: Some(9001),
            })
        );
    }

    #[test]
    fn configure_requires_ports() {
        let err = ObserverCommand::parse(r#"{"event":"configure","params":{"signalPort":1}}"#)
            .unwrap_err();
        assert_matches!(err, CommandError::InvalidParams(_));
        let err = ObserverCommand::parse(r#"{"event":"configure"}"#).unwrap_err();
        assert_matches!(err, CommandError::InvalidParams(_));
    }

    #[test]
    fn out_of_range_port_rejected() {
        let err = ObserverCommand::parse(
            r#"{"event":"configure","params":{"signalPort":70000,"commandPort":1}}"#,
        )
        .unwrap_err();
        assert_matches!(err, CommandError::InvalidParams(_));
    }

    #[test]
    fn send_requires_object_msg() {
        let cmd = ObserverCommand::parse(r#"{"event":"send","msg":{"signal":"console:in"}}"#)
            .unwrap();
        assert_matches!(cmd, ObserverCommand::Send { msg } if msg["signal"] == "console:in");
        let err = ObserverCommand::parse(r#"{"event":"send","msg":"hi"}"#).unwrap_err();
        assert_matches!(err, CommandError::InvalidParams(_));
    }

    #[test]
    fn send_constructed_validates_envelope() {
        let cmd = ObserverCommand::parse(
            r#"{"event":"send_constructed","msg":{"protocol":1,"sent":5,"signal":"misc:pong"}}"#,
        )
        .unwrap();
        assert_matches!(cmd, ObserverCommand::SendConstructed { msg } if msg.sent == Some(5));
        let err = ObserverCommand::parse(r#"{"event":"send_constructed","msg":{"signal":3}}"#)
            .unwrap_err();
        assert_matches!(err, CommandError::InvalidEnvelope(_));
    }

    #[test]
    fn ack_request_keeps_whole_frame() {
        let cmd = ObserverCommand::parse(r#"{"event":"ack_request","requested":1000,"seq":7}"#)
            .unwrap();
        let ObserverCommand::AckRequest { requested, request } = cmd else {
            panic!("wrong command");
        };
        assert_eq!(requested, 1000);
        assert_eq!(request["seq"], 7);
        assert_eq!(request["event"], "ack_request");
    }

    #[test]
    fn ack_request_needs_requested() {
        let err = ObserverCommand::parse(r#"{"event":"ack_request"}"#).unwrap_err();
        assert_matches!(err, CommandError::InvalidParams(_));
    }

    #[test]
    fn probe_params() {
        let cmd = ObserverCommand::parse(
            r#"{"event":"probe","params":{"enabled":true,"intervalMs":250,"timeoutMs":-1}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ObserverCommand::Probe(ProbeParams {
                enabled: Some(true),
                interval_ms: Some(250),
                timeout_ms: Some(-1),
            })
        );
    }

    #[test]
    fn unknown_event_names_itself() {
        let err = ObserverCommand::parse(r#"{"event":"explode"}"#).unwrap_err();
        assert_matches!(err, CommandError::UnknownCommand(name) if name == "explode");
    }

    #[test]
    fn malformed_frames() {
        for text in ["nope", "[1]", r#"{"msg":{}}"#, r#"{"event":5}"#] {
            assert_matches!(
                ObserverCommand::parse(text),
                Err(CommandError::Malformed(_)),
                "{text}"
            );
        }
    }

    #[test]
    fn command_to_value_parses_back() {
        let cmds = [
            ObserverCommand::Construct(ConstructParams {
                host: Some("127.0.0.1".into()),
                signal_port: Some(0),
                command_port: Some(9001),
            }),
            ObserverCommand::Status,
            ObserverCommand::Probe(ProbeParams {
                enabled: Some(false),
                ..ProbeParams::default()
            }),
        ];
        for cmd in cmds {
            let text = cmd.to_value().to_string();
            assert_eq!(ObserverCommand::parse(&text).unwrap(), cmd);
        }
    }

    #[test]
    fn receive_event_wire_form() {
        let env: Envelope = serde_json::from_value(
            json!({"protocol": 1, "sent": 10, "signal": "console:log", "text": "x"}),
        )
        .unwrap();
        let text = serde_json::to_string(&ObserverEvent::Receive { msg: env }).unwrap();
        assert_eq!(
            text,
            r#"{"event":"receive","msg":{"protocol":1,"sent":10,"signal":"console:log","text":"x"}}"#
        );
    }

    #[test]
    fn connected_and_configured_are_camel_case() {
        let v = serde_json::to_value(ObserverEvent::Connected {
            observer_id: "observer_1".into(),
        })
        .unwrap();
        assert_eq!(v, json!({"event": "connected", "observerId": "observer_1"}));

        let v = serde_json::to_value(ObserverEvent::Configured {
            host: "127.0.0.1".into(),
            signal_addr: "127.0.0.1:9000".into(),
            command_port: 9001,
        })
        .unwrap();
        assert_eq!(v["signalAddr"], "127.0.0.1:9000");
        assert_eq!(v["commandPort"], 9001);
    }

    #[test]
    fn status_event_flattens_chain_status() {
        let status = ChainStatus::<AppAverages> {
            chain: ChainKind::App,
            enabled: true,
            interval_ms: 1000,
            timeout_ms: 3000,
            alive: false,
            last_seen: None,
            samples: 0,
            averages: None,
        };
        let event = ObserverEvent::Status(status);
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["event"], "status");
        assert_eq!(v["chain"], "app");
        assert_eq!(v["intervalMs"], 1000);
        let back: ObserverEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, event);
    }
}
