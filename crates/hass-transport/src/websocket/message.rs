//! Wire messages exchanged with the hub.
//!
//! Every frame is a JSON object carrying a `type` tag. Outbound requests also
//! carry an `id` the hub echoes back in its `result`; the authentication
//! message is the only one without an id.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::RequestId;

/// Type tag of the outbound authentication message.
pub const TYPE_AUTH: &str = "auth";
/// Sent by the hub right after the channel opens.
pub const TYPE_AUTH_REQUIRED: &str = "auth_required";
/// Sent by the hub when the credential was accepted.
pub const TYPE_AUTH_OK: &str = "auth_ok";
/// Sent by the hub when the credential was refused.
pub const TYPE_AUTH_INVALID: &str = "auth_invalid";
/// Answer to a correlated request.
pub const TYPE_RESULT: &str = "result";
/// Pushed event for an active subscription.
pub const TYPE_EVENT: &str = "event";
/// Event subscription request.
pub const TYPE_SUBSCRIBE_EVENTS: &str = "subscribe_events";
/// Service call request.
pub const TYPE_CALL_SERVICE: &str = "call_service";

/// Error code returned when a request id was already used on this connection.
pub const ERROR_CODE_ID_REUSE: &str = "id_reuse";
/// Error code returned for malformed messages (or a zero id).
pub const ERROR_CODE_INVALID_FORMAT: &str = "invalid_format";

fn is_false(b: &bool) -> bool {
    !*b
}

/// Authentication message answering `auth_required`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Authentication {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub access_token: String,
}

impl Authentication {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            type_tag: TYPE_AUTH.to_string(),
            access_token: access_token.into(),
        }
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("type_tag", &self.type_tag)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// `auth_required`, `auth_ok` and `auth_invalid` frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthPhase {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ha_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request to receive pushed events of one type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub id: RequestId,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub event_type: String,
}

impl EventSubscription {
    pub fn new(id: RequestId, event_type: impl Into<String>) -> Self {
        Self {
            id,
            type_tag: TYPE_SUBSCRIBE_EVENTS.to_string(),
            event_type: event_type.into(),
        }
    }
}

/// Entities a service call applies to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_id: Vec<String>,
}

/// Service call such as `light.turn_on`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub id: RequestId,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub domain: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ServiceTarget>,
}

impl ServiceCall {
    pub fn new(id: RequestId, domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            id,
            type_tag: TYPE_CALL_SERVICE.to_string(),
            domain: domain.into(),
            service: service.into(),
            service_data: None,
            target: None,
        }
    }

    /// Target one more entity, e.g. `light.kitchen`.
    #[must_use]
    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.target
            .get_or_insert_with(ServiceTarget::default)
            .entity_id
            .push(entity_id.into());
        self
    }

    /// Set one `service_data` field.
    #[must_use]
    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.service_data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Error payload of a failed result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Answer to a correlated request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub id: RequestId,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
}

impl ResultMessage {
    /// Error code of a failed result, empty when absent.
    pub fn error_code(&self) -> &str {
        self.error.as_ref().map(|e| e.code.as_str()).unwrap_or_default()
    }

    /// Error message of a failed result, empty when absent.
    pub fn error_message(&self) -> &str {
        self.error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or_default()
    }

    /// Whether the failure is cured by resending with a fresh id.
    pub fn needs_new_id(&self) -> bool {
        matches!(
            self.error_code(),
            ERROR_CODE_ID_REUSE | ERROR_CODE_INVALID_FORMAT
        )
    }
}

/// State of one entity as carried by `state_changed` events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Typed view of a `state_changed` event payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct StateChange {
    pub entity_id: String,
    #[serde(default)]
    pub old_state: Option<EntityState>,
    #[serde(default)]
    pub new_state: Option<EntityState>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContent {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_fired: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl EventContent {
    /// `data.entity_id`, present on most entity related events.
    pub fn entity_id(&self) -> Option<&str> {
        self.data.get("entity_id").and_then(Value::as_str)
    }

    /// Decode the payload of a `state_changed` event.
    pub fn state_change(&self) -> Option<StateChange> {
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// Event pushed for a subscription; `id` is the subscription's id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: RequestId,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub event: EventContent,
}

/// Any frame without a dedicated struct.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawMessage(pub Value);

/// One message of the hub protocol.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Authentication(Authentication),
    AuthPhase(AuthPhase),
    EventSubscription(EventSubscription),
    ServiceCall(ServiceCall),
    Result(ResultMessage),
    Event(EventMessage),
    Raw(RawMessage),
}

impl Message {
    /// Authentication message carrying the credential.
    pub fn authentication(access_token: impl Into<String>) -> Self {
        Self::Authentication(Authentication::new(access_token))
    }

    /// Correlation id; [`RequestId::UNCORRELATED`] for the handshake.
    pub fn id(&self) -> RequestId {
        match self {
            Self::Authentication(_) | Self::AuthPhase(_) => RequestId::UNCORRELATED,
            Self::EventSubscription(m) => m.id,
            Self::ServiceCall(m) => m.id,
            Self::Result(m) => m.id,
            Self::Event(m) => m.id,
            Self::Raw(RawMessage(value)) => {
                RequestId(value.get("id").and_then(Value::as_u64).unwrap_or_default())
            }
        }
    }

    /// Wire `type` tag.
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Authentication(m) => &m.type_tag,
            Self::AuthPhase(m) => &m.type_tag,
            Self::EventSubscription(m) => &m.type_tag,
            Self::ServiceCall(m) => &m.type_tag,
            Self::Result(m) => &m.type_tag,
            Self::Event(m) => &m.type_tag,
            Self::Raw(RawMessage(value)) => {
                value.get("type").and_then(Value::as_str).unwrap_or_default()
            }
        }
    }

    /// Copy of this message carrying `id`.
    ///
    /// Handshake messages are never correlated and come back unchanged.
    #[must_use]
    pub fn with_id(&self, id: RequestId) -> Self {
        match self {
            Self::Authentication(_) | Self::AuthPhase(_) => self.clone(),
            Self::EventSubscription(m) => Self::EventSubscription(EventSubscription {
                id,
                ..m.clone()
            }),
            Self::ServiceCall(m) => Self::ServiceCall(ServiceCall { id, ..m.clone() }),
            Self::Result(m) => Self::Result(ResultMessage { id, ..m.clone() }),
            Self::Event(m) => Self::Event(EventMessage { id, ..m.clone() }),
            Self::Raw(RawMessage(value)) => {
                let mut value = value.clone();
                if let Value::Object(map) = &mut value {
                    map.insert("id".to_string(), Value::from(id.get()));
                }
                Self::Raw(RawMessage(value))
            }
        }
    }

    /// Prototype kind matching this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Authentication(_) => MessageKind::Authentication,
            Self::AuthPhase(_) => MessageKind::AuthPhase,
            Self::EventSubscription(_) => MessageKind::EventSubscription,
            Self::ServiceCall(_) => MessageKind::ServiceCall,
            Self::Result(_) => MessageKind::Result,
            Self::Event(_) => MessageKind::Event,
            Self::Raw(_) => MessageKind::Raw,
        }
    }

    /// Messages allowed on the channel before the hub accepted the credential.
    pub fn is_auth_handshake(&self) -> bool {
        self.type_tag().starts_with(TYPE_AUTH)
    }

    pub fn as_subscription(&self) -> Option<&EventSubscription> {
        match self {
            Self::EventSubscription(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_result(&self) -> Option<&ResultMessage> {
        match self {
            Self::Result(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventMessage> {
        match self {
            Self::Event(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_auth_phase(&self) -> Option<&AuthPhase> {
        match self {
            Self::AuthPhase(m) => Some(m),
            _ => None,
        }
    }

    /// Serialize to the JSON text written on the channel.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<EventSubscription> for Message {
    fn from(m: EventSubscription) -> Self {
        Self::EventSubscription(m)
    }
}

impl From<ServiceCall> for Message {
    fn from(m: ServiceCall) -> Self {
        Self::ServiceCall(m)
    }
}

impl From<Authentication> for Message {
    fn from(m: Authentication) -> Self {
        Self::Authentication(m)
    }
}

/// Shape an inbound frame is decoded into.
///
/// Registered next to every callback; the reader decodes the frame into a
/// fresh value of this kind before invoking the handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum MessageKind {
    Authentication,
    AuthPhase,
    EventSubscription,
    ServiceCall,
    Result,
    Event,
    Raw,
}

impl MessageKind {
    /// Fully decode `text` as this kind.
    pub fn decode(self, text: &str) -> serde_json::Result<Message> {
        Ok(match self {
            Self::Authentication => Message::Authentication(serde_json::from_str(text)?),
            Self::AuthPhase => Message::AuthPhase(serde_json::from_str(text)?),
            Self::EventSubscription => Message::EventSubscription(serde_json::from_str(text)?),
            Self::ServiceCall => Message::ServiceCall(serde_json::from_str(text)?),
            Self::Result => Message::Result(serde_json::from_str(text)?),
            Self::Event => Message::Event(serde_json::from_str(text)?),
            Self::Raw => Message::Raw(serde_json::from_str(text)?),
        })
    }
}

#[derive(Deserialize)]
struct TypeOnly {
    #[serde(rename = "type")]
    type_tag: String,
}

/// Read only the `type` tag of a frame, ignoring every other field.
pub fn peek_type(text: &str) -> serde_json::Result<String> {
    serde_json::from_str::<TypeOnly>(text).map(|t| t.type_tag)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_authentication_has_no_id() {
        let msg = Message::authentication("secret");
        assert_eq!(msg.id(), RequestId::UNCORRELATED);
        assert_eq!(msg.type_tag(), "auth");
        assert!(msg.is_auth_handshake());

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "auth", "access_token": "secret"}));
    }

    #[test]
    fn test_authentication_debug_redacts_token() {
        let rendered = format!("{:?}", Message::authentication("secret"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_subscription_wire_format() {
        let msg = Message::from(EventSubscription::new(RequestId(4), "state_changed"));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"id": 4, "type": "subscribe_events", "event_type": "state_changed"})
        );
        assert!(!msg.is_auth_handshake());
    }

    #[test]
    fn test_service_call_wire_format() {
        let msg = Message::from(
            ServiceCall::new(RequestId(12), "light", "turn_on")
                .entity("light.kitchen")
                .data("brightness", 120),
        );
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 12,
                "type": "call_service",
                "domain": "light",
                "service": "turn_on",
                "service_data": {"brightness": 120},
                "target": {"entity_id": ["light.kitchen"]}
            })
        );
    }

    #[test]
    fn test_with_id_keeps_payload() {
        let original = Message::from(ServiceCall::new(RequestId(7), "switch", "toggle").entity("switch.heater"));
        let retried = original.with_id(RequestId(8));

        assert_eq!(original.id(), RequestId(7));
        assert_eq!(retried.id(), RequestId(8));
        assert_eq!(retried.with_id(RequestId(7)), original);
    }

    #[test]
    fn test_with_id_on_raw_message() {
        let msg = Message::Raw(RawMessage(json!({"id": 3, "type": "ping"})));
        let retried = msg.with_id(RequestId(30));
        assert_eq!(retried.id(), RequestId(30));
        assert_eq!(retried.type_tag(), "ping");
    }

    #[test]
    fn test_with_id_ignores_handshake() {
        let msg = Message::authentication("secret");
        assert_eq!(msg.with_id(RequestId(9)).id(), RequestId::UNCORRELATED);
    }

    #[test]
    fn test_peek_type_ignores_other_fields() {
        let text = r#"{"type":"event","id":3,"event":{"unexpected":[1,2,3]}}"#;
        assert_eq!(peek_type(text).unwrap(), "event");
        assert!(peek_type(r#"{"id":3}"#).is_err());
        assert!(peek_type("not json").is_err());
    }

    #[test]
    fn test_decode_failed_result() {
        let text = r#"{"id":7,"type":"result","success":false,"error":{"code":"invalid_format","message":"Message incorrectly formatted."}}"#;
        let msg = MessageKind::Result.decode(text).unwrap();
        let result = msg.as_result().unwrap();
        assert_eq!(result.id, RequestId(7));
        assert!(!result.success);
        assert_eq!(result.error_code(), "invalid_format");
        assert!(result.needs_new_id());
    }

    #[test]
    fn test_decode_successful_result() {
        let text = r#"{"id":2,"type":"result","success":true,"result":null}"#;
        let msg = MessageKind::Result.decode(text).unwrap();
        let result = msg.as_result().unwrap();
        assert!(result.success);
        assert_eq!(result.error_code(), "");
        assert!(!result.needs_new_id());
    }

    #[test]
    fn test_other_failures_keep_id() {
        let result = ResultMessage {
            id: RequestId(5),
            type_tag: TYPE_RESULT.to_string(),
            success: false,
            result: None,
            error: Some(ResultError {
                code: "not_found".to_string(),
                message: "Service not found.".to_string(),
            }),
        };
        assert!(!result.needs_new_id());
    }

    #[test]
    fn test_decode_auth_phase() {
        let msg = MessageKind::AuthPhase
            .decode(r#"{"type":"auth_required","ha_version":"2024.1.0"}"#)
            .unwrap();
        let phase = msg.as_auth_phase().unwrap();
        assert_eq!(phase.type_tag, TYPE_AUTH_REQUIRED);
        assert_eq!(phase.ha_version.as_deref(), Some("2024.1.0"));
        assert!(msg.is_auth_handshake());
    }

    #[test]
    fn test_decode_state_changed_event() {
        let text = json!({
            "id": 1,
            "type": "event",
            "event": {
                "event_type": "state_changed",
                "data": {
                    "entity_id": "sensor.bathroom_humidity",
                    "old_state": {"entity_id": "sensor.bathroom_humidity", "state": "61"},
                    "new_state": {"entity_id": "sensor.bathroom_humidity", "state": "72", "attributes": {"unit_of_measurement": "%"}}
                },
                "origin": "LOCAL",
                "time_fired": "2024-01-01T00:00:00+00:00"
            }
        })
        .to_string();

        let msg = MessageKind::Event.decode(&text).unwrap();
        let event = msg.as_event().unwrap();
        assert_eq!(event.id, RequestId(1));
        assert_eq!(event.event.event_type, "state_changed");
        assert_eq!(event.event.entity_id(), Some("sensor.bathroom_humidity"));

        let change = event.event.state_change().unwrap();
        assert_eq!(change.old_state.unwrap().state, "61");
        let new_state = change.new_state.unwrap();
        assert_eq!(new_state.state, "72");
        assert_eq!(new_state.attributes["unit_of_measurement"], "%");
    }

    #[test]
    fn test_decode_wrong_shape_fails() {
        assert!(MessageKind::Event.decode(r#"{"type":"event","id":1}"#).is_err());
        assert!(MessageKind::Raw.decode(r#"{"type":"event","id":1}"#).is_ok());
    }
}
