use crate::echo::SendAck;
use crate::model::{Conversation, Message};
use crate::provider::{ProviderError, RawFrame};
use crate::session::HistoryRequest;
use crate::state::AppState;
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

#[derive(Debug)]
pub enum InternalEvent {
    // Push channel
    ChannelOpened {
        token: u64,
        scope: Option<String>,
    },
    FrameReceived {
        token: u64,
        frame: RawFrame,
        received_at: i64,
    },
    ChannelDropped {
        token: u64,
        scope: Option<String>,
        attempt: u32,
        error: String,
    },

    // Async results
    ConversationsFetched {
        result: Result<Vec<Conversation>, ProviderError>,
    },
    HistoryFetched {
        request: HistoryRequest,
        result: Result<Vec<Message>, ProviderError>,
    },
    OlderFetched {
        request: HistoryRequest,
        result: Result<Vec<Message>, ProviderError>,
    },
    SendCompleted {
        local_id: i64,
        result: Result<SendAck, ProviderError>,
    },
    MarkReadCompleted {
        message_id: i64,
        result: Result<(), ProviderError>,
    },

    // Timers
    TypingExpired {
        phone: String,
        generation: u64,
    },
}
