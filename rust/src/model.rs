//! Provider-facing records: what the collaborators return and what the push channel carries.
//!
//! Timestamps are Unix epoch milliseconds throughout the crate.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::events::optional_timestamp;

#[derive(
    uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(
    uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Unknown or missing values collapse to `Pending`, matching what providers send for
    /// messages they have not acknowledged yet.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw {
            Some("sent") => Self::Sent,
            Some("delivered") => Self::Delivered,
            Some("read") => Self::Read,
            Some("failed") => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Position along pending -> sent -> delivered -> read. `Failed` sits beside `Sent`:
    /// it may replace pending/sent but never a delivery the server already reported.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent | Self::Failed => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }
}

#[derive(
    uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    File,
}

impl MediaKind {
    pub fn from_raw(raw: &str) -> Self {
        let normalized = raw.to_lowercase();
        if normalized.contains("image") || normalized.contains("foto") {
            Self::Image
        } else if normalized.contains("audio") || normalized.contains("voice") {
            Self::Audio
        } else if normalized.contains("video") {
            Self::Video
        } else {
            Self::File
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub phone: String,
    pub direction: Direction,
    pub content: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub media: Option<MediaRef>,
    #[serde(default)]
    pub quoted_message_id: Option<i64>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(deserialize_with = "epoch_millis")]
    pub created_at: i64,
    #[serde(default, deserialize_with = "optional_epoch_millis")]
    pub read_at: Option<i64>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lead_id: Option<i64>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default, deserialize_with = "optional_epoch_millis")]
    pub last_message_at: Option<i64>,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: i64,
    pub message_id: i64,
    pub phone: String,
    pub emoji: String,
    #[serde(deserialize_with = "epoch_millis")]
    pub created_at: i64,
}

/// Sparse status patch keyed by message id, applied over fetched history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusPatch {
    pub status: MessageStatus,
    pub read_at: Option<i64>,
}

impl StatusPatch {
    /// Applies the patch without ever moving a message backwards along its status path.
    pub fn apply_to(&self, message: &mut Message) {
        if self.status.rank() >= message.status.rank() {
            message.status = self.status;
        }
        if self.read_at.is_some() {
            message.read_at = self.read_at;
        }
    }

    /// Folds a repeated patch for the same id into this one. The first observed `read_at`
    /// wins so replays never shift the timestamp the view already shows.
    pub fn absorb(&mut self, newer: StatusPatch) {
        if newer.status.rank() >= self.status.rank() {
            self.status = newer.status;
        }
        if self.read_at.is_none() {
            self.read_at = newer.read_at;
        }
    }
}

// Stored records carry either epoch milliseconds or RFC 3339 strings.
fn optional_epoch_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(d)?;
    optional_timestamp(Some(&value)).map_err(serde::de::Error::custom)
}

fn epoch_millis<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    optional_epoch_millis(d)?.ok_or_else(|| serde::de::Error::custom("timestamp is null"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(status: MessageStatus) -> Message {
        Message {
            id: 1,
            phone: "5511999990000".into(),
            direction: Direction::Outbound,
            content: "hi".into(),
            status,
            media: None,
            quoted_message_id: None,
            sender_name: None,
            created_at: 0,
            read_at: None,
            reactions: vec![],
        }
    }

    #[test]
    fn lenient_status_defaults_to_pending() {
        assert_eq!(MessageStatus::parse_lenient(None), MessageStatus::Pending);
        assert_eq!(
            MessageStatus::parse_lenient(Some("queued")),
            MessageStatus::Pending
        );
        assert_eq!(
            MessageStatus::parse_lenient(Some("read")),
            MessageStatus::Read
        );
    }

    #[test]
    fn media_kind_from_provider_labels() {
        assert_eq!(MediaKind::from_raw("imageMessage"), MediaKind::Image);
        assert_eq!(MediaKind::from_raw("FOTO"), MediaKind::Image);
        assert_eq!(MediaKind::from_raw("voice_note"), MediaKind::Audio);
        assert_eq!(MediaKind::from_raw("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_raw("document"), MediaKind::File);
        assert_eq!(MediaKind::from_raw("sticker"), MediaKind::File);
    }

    #[test]
    fn patch_never_downgrades_status() {
        let mut m = message(MessageStatus::Read);
        StatusPatch {
            status: MessageStatus::Delivered,
            read_at: None,
        }
        .apply_to(&mut m);
        assert_eq!(m.status, MessageStatus::Read);

        let mut m = message(MessageStatus::Sent);
        StatusPatch {
            status: MessageStatus::Read,
            read_at: Some(42),
        }
        .apply_to(&mut m);
        assert_eq!(m.status, MessageStatus::Read);
        assert_eq!(m.read_at, Some(42));
    }

    #[test]
    fn absorb_keeps_first_read_at() {
        let mut p = StatusPatch {
            status: MessageStatus::Read,
            read_at: Some(100),
        };
        p.absorb(StatusPatch {
            status: MessageStatus::Read,
            read_at: Some(200),
        });
        assert_eq!(p.read_at, Some(100));
    }

    #[test]
    fn message_deserializes_from_camel_case() {
        let m: Message = serde_json::from_value(serde_json::json!({
            "id": 7,
            "phone": "5511988887777",
            "direction": "inbound",
            "content": "oi",
            "status": "delivered",
            "createdAt": 1_700_000_000_000i64,
        }))
        .unwrap();
        assert_eq!(m.direction, Direction::Inbound);
        assert_eq!(m.status, MessageStatus::Delivered);
        assert!(m.reactions.is_empty());
    }

    #[test]
    fn stored_timestamps_accept_rfc3339() {
        let m: Message = serde_json::from_value(serde_json::json!({
            "id": 8,
            "phone": "5511988887777",
            "direction": "outbound",
            "content": "ok",
            "status": "read",
            "createdAt": "2024-03-01T10:00:00Z",
            "readAt": "2024-03-01T10:01:00.500-03:00",
            "reactions": [{
                "id": 1,
                "messageId": 8,
                "phone": "5511988887777",
                "emoji": "👍",
                "createdAt": 1_709_287_260_000i64,
            }],
        }))
        .unwrap();
        assert_eq!(m.created_at, 1_709_287_200_000);
        assert_eq!(m.read_at, Some(1_709_298_060_500));
        assert_eq!(m.reactions[0].created_at, 1_709_287_260_000);

        let c: Conversation = serde_json::from_value(serde_json::json!({
            "phone": "5511988887777",
            "lastMessageAt": null,
        }))
        .unwrap();
        assert_eq!(c.last_message_at, None);

        let bad = serde_json::from_value::<Message>(serde_json::json!({
            "id": 9,
            "phone": "5511988887777",
            "direction": "inbound",
            "content": "x",
            "status": "sent",
            "createdAt": "yesterday",
        }));
        assert!(bad.is_err());
    }
}
