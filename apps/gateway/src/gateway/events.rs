//! Wire envelopes and event payloads.
//!
//! Every frame is `{"event": <tag>, "data": <payload>}`. Inbound frames are
//! decoded in two steps: the envelope first, then `data` against the schema
//! the tag selects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventError;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A frame received from the client, with its payload still undecoded.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, EventError> {
        serde_json::from_str(text).map_err(|_| EventError::InvalidEnvelope)
    }
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    data: Value,
}

/// Serialize one outbound frame. A payload that serializes to `null` is
/// left out of the envelope.
pub fn encode<T: Serialize + ?Sized>(event: &str, data: &T) -> Result<String, serde_json::Error> {
    let data = serde_json::to_value(data)?;
    serde_json::to_string(&OutboundEnvelope { event, data })
}

// ---------------------------------------------------------------------------
// Server → Client event names
// ---------------------------------------------------------------------------

/// Event names sent to clients.
pub struct EventName;

impl EventName {
    pub const AUTH_SUCCESS: &'static str = "auth_success";
    pub const NEW_MESSAGE: &'static str = "new_message";
    pub const USER_TYPING: &'static str = "user_typing";
    pub const NEW_REACTION: &'static str = "new_reaction";
    pub const MESSAGE_READ: &'static str = "message_read";
    pub const ERROR: &'static str = "error";
}

// ---------------------------------------------------------------------------
// Client → Server events
// ---------------------------------------------------------------------------

/// The closed set of tags a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEventKind {
    Auth,
    SendMessage,
    Typing,
    AddReaction,
    MarkRead,
}

impl ClientEventKind {
    pub const AUTH_TAG: &'static str = "auth";

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            Self::AUTH_TAG => Some(Self::Auth),
            "send_message" => Some(Self::SendMessage),
            "typing" => Some(Self::Typing),
            "add_reaction" => Some(Self::AddReaction),
            "mark_read" => Some(Self::MarkRead),
            _ => None,
        }
    }

    /// Short noun used in "Invalid <label> data" replies.
    pub fn label(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::SendMessage => "message",
            Self::Typing => "typing",
            Self::AddReaction => "reaction",
            Self::MarkRead => "read",
        }
    }
}

/// A fully decoded client event.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Auth(AuthPayload),
    SendMessage(SendMessagePayload),
    Typing(TypingPayload),
    AddReaction(AddReactionPayload),
    MarkRead(MarkReadPayload),
}

impl ClientEvent {
    /// Decode `data` against the schema for `kind`.
    pub fn decode(kind: ClientEventKind, data: Value) -> Result<Self, EventError> {
        let invalid = |_| EventError::InvalidPayload(kind);
        Ok(match kind {
            ClientEventKind::Auth => Self::Auth(serde_json::from_value(data).map_err(invalid)?),
            ClientEventKind::SendMessage => {
                Self::SendMessage(serde_json::from_value(data).map_err(invalid)?)
            }
            ClientEventKind::Typing => Self::Typing(serde_json::from_value(data).map_err(invalid)?),
            ClientEventKind::AddReaction => {
                Self::AddReaction(serde_json::from_value(data).map_err(invalid)?)
            }
            ClientEventKind::MarkRead => {
                Self::MarkRead(serde_json::from_value(data).map_err(invalid)?)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthPayload {
    /// Missing and empty tokens are both rejected by the auth handler.
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendMessagePayload {
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
    #[serde(default)]
    pub attachment_ids: Vec<i64>,
}

// Absent fields take their zero value; only a wrong JSON type is invalid.

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypingPayload {
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default)]
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddReactionPayload {
    #[serde(default)]
    pub message_id: i64,
    #[serde(default)]
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarkReadPayload {
    #[serde(default)]
    pub message_ids: Vec<i64>,
}

// ---------------------------------------------------------------------------
// Server → Client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AuthSuccessPayload<'a> {
    pub user_id: i64,
    pub name: &'a str,
    pub phone: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserTypingPayload<'a> {
    pub chat_id: i64,
    pub user_id: i64,
    pub name: &'a str,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewReactionPayload<'a> {
    pub message_id: i64,
    pub user_id: i64,
    pub name: &'a str,
    pub emoji: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReadPayload<'a> {
    pub message_ids: &'a [i64],
    pub user_id: i64,
    pub name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload<'a> {
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_without_data_defaults_to_null() {
        let env = Envelope::parse(r#"{"event":"typing"}"#).unwrap();
        assert_eq!(env.event, "typing");
        assert!(env.data.is_null());
    }

    #[test]
    fn malformed_envelope_is_rejected() {
        assert_eq!(
            Envelope::parse("not json").unwrap_err(),
            EventError::InvalidEnvelope
        );
        assert_eq!(
            Envelope::parse(r#"{"data":{}}"#).unwrap_err(),
            EventError::InvalidEnvelope
        );
    }

    #[test]
    fn tags_map_to_kinds() {
        assert_eq!(ClientEventKind::from_tag("auth"), Some(ClientEventKind::Auth));
        assert_eq!(
            ClientEventKind::from_tag("send_message"),
            Some(ClientEventKind::SendMessage)
        );
        assert_eq!(ClientEventKind::from_tag("mark_read"), Some(ClientEventKind::MarkRead));
        assert_eq!(ClientEventKind::from_tag("auth_success"), None);
        assert_eq!(ClientEventKind::from_tag("AUTH"), None);
    }

    #[test]
    fn send_message_optional_fields() {
        let event = ClientEvent::decode(ClientEventKind::SendMessage, json!({ "chat_id": 4 })).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage(SendMessagePayload {
                chat_id: 4,
                text: None,
                reply_to_id: None,
                attachment_ids: vec![],
            })
        );
    }

    #[test]
    fn missing_fields_take_zero_values() {
        assert_eq!(
            ClientEvent::decode(ClientEventKind::Typing, json!({ "chat_id": 1 })).unwrap(),
            ClientEvent::Typing(TypingPayload {
                chat_id: 1,
                is_typing: false,
            })
        );
        assert_eq!(
            ClientEvent::decode(ClientEventKind::AddReaction, json!({ "message_id": 3 })).unwrap(),
            ClientEvent::AddReaction(AddReactionPayload {
                message_id: 3,
                emoji: String::new(),
            })
        );
        assert_eq!(
            ClientEvent::decode(ClientEventKind::MarkRead, json!({})).unwrap(),
            ClientEvent::MarkRead(MarkReadPayload { message_ids: vec![] })
        );
    }

    #[test]
    fn payload_shape_mismatch_names_the_kind() {
        let err = ClientEvent::decode(ClientEventKind::Typing, json!({ "chat_id": "x" })).unwrap_err();
        assert_eq!(err.to_string(), "Invalid typing data");

        let err = ClientEvent::decode(ClientEventKind::MarkRead, Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "Invalid read data");

        let err = ClientEvent::decode(ClientEventKind::MarkRead, json!({ "message_ids": "3" })).unwrap_err();
        assert_eq!(err.to_string(), "Invalid read data");

        let err = ClientEvent::decode(ClientEventKind::AddReaction, json!({ "emoji": 7 })).unwrap_err();
        assert_eq!(err.to_string(), "Invalid reaction data");

        let err = ClientEvent::decode(ClientEventKind::Auth, json!([1, 2])).unwrap_err();
        assert_eq!(err.to_string(), "Invalid auth data");
    }

    #[test]
    fn encode_omits_null_data() {
        assert_eq!(encode("x", &Value::Null).unwrap(), r#"{"event":"x"}"#);
        assert_eq!(
            encode(
                EventName::ERROR,
                &ErrorPayload {
                    message: "Authentication required",
                    code: None,
                }
            )
            .unwrap(),
            r#"{"event":"error","data":{"message":"Authentication required"}}"#
        );
    }

    #[test]
    fn encode_preserves_backend_body() {
        let body = json!({ "id": 10, "text": "hi", "chat_id": 3 });
        let frame: Value = serde_json::from_str(&encode(EventName::NEW_MESSAGE, &body).unwrap()).unwrap();
        assert_eq!(frame, json!({ "event": "new_message", "data": body }));
    }
}
