//! Push-channel payload normalisation.
//!
//! Frames arrive as an optional transport event name plus a JSON `data` body whose fields
//! are all optional on the wire. `normalize` turns one frame into a typed [`ChatEvent`] or
//! explains why it cannot.

use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::model::{Direction, MediaKind, MediaRef, Message, MessageStatus, Reaction};
use crate::phone::normalize_phone;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Connected {
        session_id: Option<String>,
    },
    NewMessage {
        phone: String,
        message: Message,
    },
    MessageRead {
        message_id: i64,
        phone: Option<String>,
        status: MessageStatus,
        read_at: Option<i64>,
    },
    TypingStart {
        phone: String,
        at: i64,
    },
    TypingStop {
        phone: String,
    },
    ContactOnline {
        phone: String,
    },
    ContactOffline {
        phone: String,
    },
    ReactionAdded {
        reaction: Reaction,
    },
    ReactionRemoved {
        reaction_id: i64,
        message_id: Option<i64>,
    },
}

impl ChatEvent {
    /// Log-safe kind tag.
    pub fn tag(&self) -> &'static str {
        match self {
            ChatEvent::Connected { .. } => "connected",
            ChatEvent::NewMessage { .. } => "new-message",
            ChatEvent::MessageRead { .. } => "message-read",
            ChatEvent::TypingStart { .. } => "typing-start",
            ChatEvent::TypingStop { .. } => "typing-stop",
            ChatEvent::ContactOnline { .. } => "contact-online",
            ChatEvent::ContactOffline { .. } => "contact-offline",
            ChatEvent::ReactionAdded { .. } => "reaction-added",
            ChatEvent::ReactionRemoved { .. } => "reaction-removed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
    #[error("missing field `{field}` for {kind}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawPayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    session_id: Option<Value>,
    mentorado_id: Option<Value>,
    phone: Option<String>,
    id: Option<i64>,
    direction: Option<String>,
    content: Option<String>,
    status: Option<String>,
    media_type: Option<String>,
    media_url: Option<String>,
    media_thumbnail: Option<String>,
    media_size: Option<u64>,
    quoted_message_id: Option<i64>,
    sender_name: Option<String>,
    created_at: Option<Value>,
    message_id: Option<i64>,
    read_at: Option<Value>,
    at: Option<Value>,
    reaction: Option<RawReaction>,
    reaction_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReaction {
    id: i64,
    message_id: i64,
    phone: String,
    emoji: String,
    #[serde(default)]
    created_at: Option<Value>,
}

/// Normalises one push frame. `received_at` fills timestamps the sender left out.
pub fn normalize(
    event_name: Option<&str>,
    data: &str,
    received_at: i64,
) -> Result<ChatEvent, NormalizeError> {
    let raw: RawPayload = serde_json::from_str(data)?;
    let kind = raw
        .kind
        .clone()
        .or_else(|| event_name.map(str::to_string))
        .unwrap_or_default();

    match kind.as_str() {
        "connected" => Ok(ChatEvent::Connected {
            session_id: raw
                .session_id
                .as_ref()
                .or(raw.mentorado_id.as_ref())
                .map(value_to_string),
        }),
        "new-message" => new_message(raw, received_at),
        "message-read" => {
            let message_id = raw.message_id.ok_or(NormalizeError::MissingField {
                kind: "message-read",
                field: "messageId",
            })?;
            let status = match raw.status.as_deref() {
                None => MessageStatus::Read,
                other => MessageStatus::parse_lenient(other),
            };
            Ok(ChatEvent::MessageRead {
                message_id,
                phone: raw.phone.as_deref().map(normalize_phone),
                status,
                read_at: optional_timestamp(raw.read_at.as_ref())?,
            })
        }
        "typing-start" => Ok(ChatEvent::TypingStart {
            phone: required_phone(&raw, "typing-start")?,
            at: optional_timestamp(raw.at.as_ref())?.unwrap_or(received_at),
        }),
        "typing-stop" => Ok(ChatEvent::TypingStop {
            phone: required_phone(&raw, "typing-stop")?,
        }),
        "contact-online" => Ok(ChatEvent::ContactOnline {
            phone: required_phone(&raw, "contact-online")?,
        }),
        "contact-offline" => Ok(ChatEvent::ContactOffline {
            phone: required_phone(&raw, "contact-offline")?,
        }),
        "reaction-added" => {
            let r = raw.reaction.ok_or(NormalizeError::MissingField {
                kind: "reaction-added",
                field: "reaction",
            })?;
            Ok(ChatEvent::ReactionAdded {
                reaction: Reaction {
                    id: r.id,
                    message_id: r.message_id,
                    phone: normalize_phone(&r.phone),
                    emoji: r.emoji,
                    created_at: optional_timestamp(r.created_at.as_ref())?.unwrap_or(received_at),
                },
            })
        }
        "reaction-removed" => Ok(ChatEvent::ReactionRemoved {
            reaction_id: raw.reaction_id.ok_or(NormalizeError::MissingField {
                kind: "reaction-removed",
                field: "reactionId",
            })?,
            message_id: raw.message_id,
        }),
        _ => Err(NormalizeError::UnknownKind(kind)),
    }
}

fn new_message(raw: RawPayload, received_at: i64) -> Result<ChatEvent, NormalizeError> {
    let phone = required_phone(&raw, "new-message")?;
    let id = raw.id.ok_or(NormalizeError::MissingField {
        kind: "new-message",
        field: "id",
    })?;
    let direction = raw
        .direction
        .as_deref()
        .and_then(Direction::parse)
        .ok_or(NormalizeError::MissingField {
            kind: "new-message",
            field: "direction",
        })?;
    let media = raw.media_type.as_deref().map(|t| MediaRef {
        kind: MediaKind::from_raw(t),
        url: raw.media_url.clone(),
        thumbnail_url: raw.media_thumbnail.clone(),
        size_bytes: raw.media_size,
    });
    let message = Message {
        id,
        phone: phone.clone(),
        direction,
        content: raw.content.unwrap_or_default(),
        status: MessageStatus::parse_lenient(raw.status.as_deref()),
        media,
        quoted_message_id: raw.quoted_message_id,
        sender_name: raw.sender_name,
        created_at: optional_timestamp(raw.created_at.as_ref())?.unwrap_or(received_at),
        read_at: None,
        reactions: vec![],
    };
    Ok(ChatEvent::NewMessage { phone, message })
}

fn required_phone(raw: &RawPayload, kind: &'static str) -> Result<String, NormalizeError> {
    raw.phone
        .as_deref()
        .map(normalize_phone)
        .filter(|p| !p.is_empty())
        .ok_or(NormalizeError::MissingField {
            kind,
            field: "phone",
        })
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accepts RFC 3339 strings or epoch milliseconds; `null` reads as absent.
pub fn optional_timestamp(value: Option<&Value>) -> Result<Option<i64>, NormalizeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| NormalizeError::InvalidTimestamp(n.to_string())),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.timestamp_millis()))
            .map_err(|_| NormalizeError::InvalidTimestamp(s.clone())),
        Some(other) => Err(NormalizeError::InvalidTimestamp(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn frame(name: Option<&str>, data: Value) -> Result<ChatEvent, NormalizeError> {
        normalize(name, &data.to_string(), NOW)
    }

    #[test]
    fn new_message_from_named_frame() {
        let ev = frame(
            Some("new-message"),
            json!({
                "id": 50,
                "phone": "+55 11 99999-0000",
                "direction": "outbound",
                "content": "Hello",
                "status": "sent",
                "createdAt": "2024-03-01T10:03:00.000Z",
            }),
        )
        .unwrap();
        let ChatEvent::NewMessage { phone, message } = ev else {
            panic!("expected new-message");
        };
        assert_eq!(phone, "5511999990000");
        assert_eq!(message.id, 50);
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.created_at, 1_709_287_380_000);
    }

    #[test]
    fn type_field_overrides_event_name() {
        let ev = frame(
            Some("reaction"),
            json!({
                "type": "reaction-removed",
                "reactionId": 9,
                "messageId": 3,
            }),
        )
        .unwrap();
        assert_eq!(
            ev,
            ChatEvent::ReactionRemoved {
                reaction_id: 9,
                message_id: Some(3),
            }
        );
    }

    #[test]
    fn reaction_added_carries_record() {
        let ev = frame(
            Some("reaction"),
            json!({
                "type": "reaction-added",
                "reaction": {
                    "id": 4,
                    "messageId": 2,
                    "phone": "5511999990000",
                    "emoji": "👍",
                    "createdAt": NOW - 5,
                },
            }),
        )
        .unwrap();
        let ChatEvent::ReactionAdded { reaction } = ev else {
            panic!("expected reaction-added");
        };
        assert_eq!(reaction.message_id, 2);
        assert_eq!(reaction.created_at, NOW - 5);
    }

    #[test]
    fn message_read_defaults_status_to_read() {
        let ev = frame(None, json!({"type": "message-read", "messageId": 2})).unwrap();
        assert_eq!(
            ev,
            ChatEvent::MessageRead {
                message_id: 2,
                phone: None,
                status: MessageStatus::Read,
                read_at: None,
            }
        );
    }

    #[test]
    fn typing_start_defaults_at_to_receive_time() {
        let ev = frame(Some("typing-start"), json!({"phone": "5511999990000"})).unwrap();
        assert_eq!(
            ev,
            ChatEvent::TypingStart {
                phone: "5511999990000".into(),
                at: NOW,
            }
        );
    }

    #[test]
    fn rejects_missing_fields_and_unknown_kinds() {
        assert!(matches!(
            frame(Some("new-message"), json!({"phone": "5511999990000", "direction": "inbound"})),
            Err(NormalizeError::MissingField { field: "id", .. })
        ));
        assert!(matches!(
            frame(Some("new-message"), json!({"id": 1, "phone": "5511999990000", "direction": "sideways"})),
            Err(NormalizeError::MissingField { field: "direction", .. })
        ));
        assert!(matches!(
            frame(Some("contact-online"), json!({})),
            Err(NormalizeError::MissingField { field: "phone", .. })
        ));
        assert!(matches!(
            frame(Some("status_update"), json!({})),
            Err(NormalizeError::UnknownKind(k)) if k == "status_update"
        ));
        assert!(matches!(
            normalize(Some("typing-stop"), "not json", NOW),
            Err(NormalizeError::Malformed(_))
        ));
        assert!(matches!(
            frame(Some("typing-start"), json!({"phone": "5511999990000", "at": "yesterday"})),
            Err(NormalizeError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn connected_accepts_numeric_session() {
        let ev = frame(Some("connected"), json!({"mentoradoId": 12})).unwrap();
        assert_eq!(
            ev,
            ChatEvent::Connected {
                session_id: Some("12".into()),
            }
        );
    }
}
