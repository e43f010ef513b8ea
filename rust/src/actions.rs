#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Conversation list
    RefreshConversations,

    // Conversation
    OpenConversation {
        phone: String,
    },
    CloseConversation,
    RefreshMessages,
    LoadOlderMessages {
        limit: u32,
    },

    // Compose
    UpdateDraft {
        text: String,
    },
    SendMessage {
        content: String,
    },
    RetryMessage {
        local_id: i64,
    },
    DiscardMessage {
        local_id: i64,
    },

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
    Teardown,
}

impl AppAction {
    /// Log-safe action tag (never includes message content or phone numbers).
    pub fn tag(&self) -> &'static str {
        match self {
            AppAction::RefreshConversations => "RefreshConversations",

            AppAction::OpenConversation { .. } => "OpenConversation",
            AppAction::CloseConversation => "CloseConversation",
            AppAction::RefreshMessages => "RefreshMessages",
            AppAction::LoadOlderMessages { .. } => "LoadOlderMessages",

            AppAction::UpdateDraft { .. } => "UpdateDraft",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::RetryMessage { .. } => "RetryMessage",
            AppAction::DiscardMessage { .. } => "DiscardMessage",

            AppAction::ClearToast => "ClearToast",

            AppAction::Foregrounded => "Foregrounded",
            AppAction::Teardown => "Teardown",
        }
    }
}
