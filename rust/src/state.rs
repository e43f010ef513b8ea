use crate::model::{Direction, MediaRef, MessageStatus};

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub provider: Option<ProviderKind>,
    pub connection: ConnectionState,
    pub busy: BusyState,
    pub chat_list: Vec<ChatSummary>,
    /// Set when the last conversation-list fetch failed; `chat_list` is the last good one.
    pub chat_list_stale: bool,
    pub current_chat: Option<ChatViewState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            provider: None,
            connection: ConnectionState::disconnected(),
            busy: BusyState::idle(),
            chat_list: vec![],
            chat_list_stale: false,
            current_chat: None,
            toast: None,
        }
    }
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Meta,
    Baileys,
    Zapi,
}

impl ProviderKind {
    /// Higher wins when more than one backend is connected.
    pub fn priority(self) -> u8 {
        match self {
            ProviderKind::Meta => 3,
            ProviderKind::Baileys => 2,
            ProviderKind::Zapi => 1,
        }
    }
}

/// Push channel health. Reconnection is transparent to the conversation view; this is only
/// surfaced so the UI can show connectivity quality.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub reconnect_attempt: u32,
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            reconnect_attempt: 0,
            last_error: None,
        }
    }
}

/// "In flight" flags for collaborator calls the UI should reflect.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub fetching_conversations: bool,
    pub fetching_history: bool,
    pub loading_older: bool,
    pub sending: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            fetching_conversations: false,
            fetching_history: false,
            loading_older: false,
            sending: false,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatSummary {
    pub phone: String,
    pub name: Option<String>,
    pub lead_id: Option<i64>,
    pub last_message: Option<String>,
    pub last_message_at: Option<i64>,
    pub unread_count: u32,
    pub is_online: bool,
    pub is_typing: bool,
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct ChatViewState {
    pub phone: String,
    pub name: Option<String>,
    pub lead_id: Option<i64>,
    pub items: Vec<TimelineItem>,
    pub can_load_older: bool,
    /// The last history fetch failed; `items` is the last successfully merged view.
    pub is_stale: bool,
    pub peer_typing: bool,
    pub peer_online: bool,
    pub draft: String,
    pub send_error: Option<String>,
}

impl ChatViewState {
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.items.iter().filter_map(|item| match item {
            TimelineItem::Message { message } => Some(message),
            TimelineItem::DayMarker { .. } => None,
        })
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq)]
pub enum TimelineItem {
    /// Calendar day (`YYYY-MM-DD`, in the configured UTC offset) of the messages that follow.
    DayMarker { date: String },
    Message { message: ChatMessage },
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    /// Server id, or a negative local id while the message is an unconfirmed echo.
    pub id: i64,
    pub direction: Direction,
    pub content: String,
    pub status: MessageStatus,
    pub media: Option<MediaRef>,
    pub quoted_message_id: Option<i64>,
    pub sender_name: Option<String>,
    pub created_at: i64,
    pub read_at: Option<i64>,
    pub reactions: Vec<ReactionSummary>,
    pub is_local_echo: bool,
    pub failure_reason: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ReactionSummary {
    pub message_id: i64,
    pub emoji: String,
    pub count: u32,
    pub phones: Vec<String>,
    pub reacted_by_me: bool,
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_priority_prefers_meta() {
        let mut kinds = vec![ProviderKind::Zapi, ProviderKind::Meta, ProviderKind::Baileys];
        kinds.sort_by_key(|k| std::cmp::Reverse(k.priority()));
        assert_eq!(
            kinds,
            vec![ProviderKind::Meta, ProviderKind::Baileys, ProviderKind::Zapi]
        );
    }

    #[test]
    fn messages_skip_day_markers() {
        let view = ChatViewState {
            phone: "5511999990000".into(),
            name: None,
            lead_id: None,
            items: vec![
                TimelineItem::DayMarker {
                    date: "2024-03-01".into(),
                },
                TimelineItem::Message {
                    message: ChatMessage {
                        id: 1,
                        direction: Direction::Inbound,
                        content: "oi".into(),
                        status: MessageStatus::Delivered,
                        media: None,
                        quoted_message_id: None,
                        sender_name: None,
                        created_at: 0,
                        read_at: None,
                        reactions: vec![],
                        is_local_echo: false,
                        failure_reason: None,
                    },
                },
            ],
            can_load_older: false,
            is_stale: false,
            peer_typing: false,
            peer_online: false,
            draft: String::new(),
            send_error: None,
        };
        assert_eq!(view.messages().map(|m| m.id).collect::<Vec<_>>(), vec![1]);
    }
}
