//! Wire messages exchanged over the duplex channel.
//!
//! Outbound traffic is always a `command`:
//!
//! ```text
//! {"type":"command","data":{"command":"subscribe","arguments":{...}},"correlation_id":7}
//! ```
//!
//! Inbound traffic is one of `command response`, `event` or `notification`,
//! discriminated by the `type` field. A command response carries a verbatim
//! copy of the request it answers, which is how it finds its caller.
//!
//! Outbound payloads are serialized once, through [`canonical_json`], and that
//! exact string is transmitted. Object keys are emitted in sorted order, so
//! re-serializing an echoed request yields the same string no matter how the
//! remote ordered its fields. The [`request_fingerprint`] is that same form
//! without the correlation id, used to match responses from a remote that
//! does not echo unknown fields.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::{RealtimeError, Result};
use crate::events::{EventSubscription, ResourceEvent};
use crate::ids::CorrelationId;
use crate::resource::ResourceIdentity;

/// Discriminant of an outbound command message.
pub const COMMAND: &str = "command";
/// Discriminant of a command response.
pub const COMMAND_RESPONSE: &str = "command response";
/// Discriminant of a resource event.
pub const EVENT: &str = "event";
/// Discriminant of a server notification.
pub const NOTIFICATION: &str = "notification";

/// Field carrying the correlation identifier on outbound commands.
pub const CORRELATION_FIELD: &str = "correlation_id";

/// A control command sent to the remote.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Start receiving events of the given types for a resource.
    Subscribe {
        /// Event types, or `["all"]`.
        actions: Vec<EventSubscription>,
        /// Target resource.
        resource: ResourceIdentity,
    },
    /// Stop receiving events of the given types for a resource.
    Unsubscribe {
        /// Event types, or `["all"]`.
        actions: Vec<EventSubscription>,
        /// Target resource.
        resource: ResourceIdentity,
    },
    /// Publish a message on a channel.
    Publish {
        /// Channel name.
        channel: String,
        /// Message body.
        data: Value,
    },
    /// Replace the connection's credentials with a fresh token.
    JwtReplace {
        /// The new token.
        token: String,
    },
}

impl Command {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Publish { .. } => "publish",
            Self::JwtReplace { .. } => "jwt replace",
        }
    }

    fn arguments(&self) -> Value {
        match self {
            Self::Subscribe { actions, resource } | Self::Unsubscribe { actions, resource } => {
                json!({ "action": actions, "resource": resource })
            }
            Self::Publish { channel, data } => json!({ "channel": channel, "data": data }),
            Self::JwtReplace { token } => json!({ "token": token }),
        }
    }
}

/// A command bound to its correlation identifier and serialized payload.
#[derive(Clone, Debug)]
pub struct OutboundCommand {
    correlation_id: CorrelationId,
    command: Command,
    payload: String,
    fingerprint: String,
}

impl OutboundCommand {
    /// Serialize `command` under `correlation_id`.
    pub fn new(correlation_id: CorrelationId, command: Command) -> Self {
        let value = json!({
            "type": COMMAND,
            "data": {
                "command": command.name(),
                "arguments": command.arguments(),
            },
            CORRELATION_FIELD: correlation_id,
        });
        Self {
            correlation_id,
            payload: canonical_json(&value),
            fingerprint: request_fingerprint(&value),
            command,
        }
    }

    /// Correlation identifier.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// The command itself.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Exact text transmitted on the wire.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Canonical payload without the correlation id.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Error object inside a command response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error code; numeric codes are normalized to strings.
    #[serde(deserialize_with = "code_as_string")]
    pub code: String,
    /// Error description.
    #[serde(default)]
    pub info: String,
}

impl From<RemoteError> for RealtimeError {
    fn from(err: RemoteError) -> Self {
        Self::Remote {
            code: err.code,
            info: err.info,
        }
    }
}

/// Reply to a previously sent command.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CommandResponse {
    /// Verbatim copy of the original command message.
    pub request: Value,
    /// Command result, when the command succeeded.
    #[serde(default)]
    pub response: Option<Value>,
    /// Failure details, when the command failed.
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl CommandResponse {
    /// Correlation identifier echoed in the request, if any.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.request
            .get(CORRELATION_FIELD)
            .and_then(Value::as_u64)
            .map(CorrelationId::from_raw)
    }

    /// Canonical serialization of the echoed request.
    pub fn canonical_request(&self) -> String {
        canonical_json(&self.request)
    }

    /// Fingerprint of the echoed request, comparable to [`OutboundCommand::fingerprint`].
    pub fn fingerprint(&self) -> String {
        request_fingerprint(&self.request)
    }

    /// Split into the successful reply or the remote error.
    pub fn into_result(self) -> Result<CommandReply> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(CommandReply {
                request: self.request,
                response: self.response,
            }),
        }
    }
}

/// Successful command response, without the error field.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandReply {
    /// Echoed request.
    pub request: Value,
    /// Command result.
    pub response: Option<Value>,
}

/// Out-of-band server notice. Today the only notice is imminent token expiry.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Notification {
    /// Notice code.
    #[serde(default, deserialize_with = "optional_code_as_string")]
    pub code: Option<String>,
    /// Human-readable description.
    #[serde(default)]
    pub info: String,
    /// Extra payload.
    #[serde(default)]
    pub data: Option<Value>,
}

/// A parsed inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    /// Reply to one of our commands.
    CommandResponse(CommandResponse),
    /// Change notification for a subscribed resource.
    Event(ResourceEvent),
    /// Server notice (token refresh trigger).
    Notification(Notification),
    /// Well-formed frame with a discriminant this client does not know.
    Unknown {
        /// The unrecognized `type` value.
        kind: String,
    },
}

/// Parse one inbound text frame.
///
/// Frames that are not JSON objects, lack a string `type`, or whose `data`
/// does not match the declared type yield [`RealtimeError::BadMessage`].
pub fn parse_inbound(text: &str) -> Result<InboundMessage> {
    let mut value: Value = serde_json::from_str(text)
        .map_err(|e| RealtimeError::bad_message(format!("invalid JSON: {e}")))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| RealtimeError::bad_message("missing message type"))?
        .to_owned();
    let data = value.get_mut("data").map(Value::take).unwrap_or(Value::Null);

    let decode_err = |e: serde_json::Error| RealtimeError::bad_message(format!("{kind}: {e}"));
    let message = match kind.as_str() {
        COMMAND_RESPONSE => InboundMessage::CommandResponse(serde_json::from_value(data).map_err(decode_err)?),
        EVENT => InboundMessage::Event(serde_json::from_value(data).map_err(decode_err)?),
        NOTIFICATION if data.is_null() => InboundMessage::Notification(Notification::default()),
        NOTIFICATION => InboundMessage::Notification(serde_json::from_value(data).map_err(decode_err)?),
        _ => InboundMessage::Unknown { kind: kind.clone() },
    };
    Ok(message)
}

/// Canonical form of a command message, ignoring its correlation id.
pub fn request_fingerprint(request: &Value) -> String {
    match request {
        Value::Object(map) if map.contains_key(CORRELATION_FIELD) => {
            let mut stripped = map.clone();
            let _ = stripped.remove(CORRELATION_FIELD);
            canonical_json(&Value::Object(stripped))
        }
        other => canonical_json(other),
    }
}

/// Serialize a JSON value with object keys in sorted order.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                let _ = out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

fn code_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn optional_code_as_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Ok(Some(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use assert_matches::assert_matches;

    fn subscribe_created() -> Command {
        Command::Subscribe {
            actions: vec![EventSubscription::Only(EventType::Created)],
            resource: ResourceIdentity::dataset("orders"),
        }
    }

    #[test]
    fn subscribe_wire_shape() {
        let cmd = OutboundCommand::new(CorrelationId::from_raw(3), subscribe_created());
        let value: Value = serde_json::from_str(cmd.payload()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "command",
                "data": {
                    "command": "subscribe",
                    "arguments": {
                        "action": ["created"],
                        "resource": {"type": "ds", "name": "orders"}
                    }
                },
                "correlation_id": 3
            })
        );
    }

    #[test]
    fn publish_and_jwt_wire_shape() {
        let publish = OutboundCommand::new(
            CorrelationId::from_raw(1),
            Command::Publish {
                channel: "chat".into(),
                data: json!({"text": "hi"}),
            },
        );
        let value: Value = serde_json::from_str(publish.payload()).unwrap();
        assert_eq!(value["data"]["command"], "publish");
        assert_eq!(value["data"]["arguments"]["channel"], "chat");
        assert_eq!(value["data"]["arguments"]["data"]["text"], "hi");

        let jwt = OutboundCommand::new(
            CorrelationId::from_raw(2),
            Command::JwtReplace { token: "t0k".into() },
        );
        let value: Value = serde_json::from_str(jwt.payload()).unwrap();
        assert_eq!(value["data"]["command"], "jwt replace");
        assert_eq!(value["data"]["arguments"]["token"], "t0k");
    }

    #[test]
    fn echoed_request_canonicalizes_to_payload() {
        let cmd = OutboundCommand::new(CorrelationId::from_raw(9), subscribe_created());
        // Same request, fields in a different order.
        let echoed = r#"{"type":"command response","data":{"request":{"correlation_id":9,"data":{"arguments":{"resource":{"name":"orders","type":"ds"},"action":["created"]},"command":"subscribe"},"type":"command"},"response":{"ok":true}}}"#;
        let InboundMessage::CommandResponse(resp) = parse_inbound(echoed).unwrap() else {
            panic!("expected command response");
        };
        assert_eq!(resp.canonical_request(), cmd.payload());
        assert_eq!(resp.fingerprint(), cmd.fingerprint());
        assert_eq!(resp.correlation_id(), Some(CorrelationId::from_raw(9)));
    }

    #[test]
    fn fingerprint_ignores_correlation_id() {
        let a = OutboundCommand::new(CorrelationId::from_raw(1), subscribe_created());
        let b = OutboundCommand::new(CorrelationId::from_raw(2), subscribe_created());
        assert_ne!(a.payload(), b.payload());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(!a.fingerprint().contains(CORRELATION_FIELD));
    }

    #[test]
    fn remote_error_with_numeric_code() {
        let text = r#"{"type":"command response","data":{"request":{},"error":{"code":2,"info":"Unauthorized"}}}"#;
        let InboundMessage::CommandResponse(resp) = parse_inbound(text).unwrap() else {
            panic!("expected command response");
        };
        let err = resp.into_result().unwrap_err();
        assert!(err.to_string().contains('2'));
        assert!(err.to_string().contains("Unauthorized"));
    }

    #[test]
    fn success_reply_drops_error_field() {
        let text = r#"{"type":"command response","data":{"request":{"correlation_id":1},"response":[1,2]}}"#;
        let InboundMessage::CommandResponse(resp) = parse_inbound(text).unwrap() else {
            panic!("expected command response");
        };
        let reply = resp.into_result().unwrap();
        assert_eq!(reply.response, Some(json!([1, 2])));
    }

    #[test]
    fn parse_event_frame() {
        let text = r#"{"type":"event","data":{"action":"deleted","resource":{"type":"fs","name":"docs"},"modifier":{"id":"u","type":"user"},"timestamp":1,"data":null}}"#;
        assert_matches!(
            parse_inbound(text).unwrap(),
            InboundMessage::Event(ev) if ev.action == EventType::Deleted
        );
    }

    #[test]
    fn parse_notification_frame() {
        let text = r#"{"type":"notification","data":{"code":1,"info":"token expiring"}}"#;
        let InboundMessage::Notification(n) = parse_inbound(text).unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(n.code.as_deref(), Some("1"));
        assert_eq!(n.info, "token expiring");
    }

    #[test]
    fn notification_without_data() {
        assert_matches!(
            parse_inbound(r#"{"type":"notification"}"#).unwrap(),
            InboundMessage::Notification(_)
        );
    }

    #[test]
    fn unknown_kind_is_not_an_error() {
        assert_eq!(
            parse_inbound(r#"{"type":"presence","data":{}}"#).unwrap(),
            InboundMessage::Unknown { kind: "presence".into() }
        );
    }

    #[test]
    fn malformed_frames_are_bad_messages() {
        for text in ["not json", "[]", r#"{"data":{}}"#, r#"{"type":"event","data":{"action":"exploded"}}"#] {
            assert_matches!(parse_inbound(text), Err(RealtimeError::BadMessage { .. }), "frame: {text}");
        }
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": {"y": 1, "x": [ {"d": 1, "c": 2} ]}, "a": null});
        assert_eq!(canonical_json(&value), r#"{"a":null,"b":{"x":[{"c":2,"d":1}],"y":1}}"#);
    }
}
