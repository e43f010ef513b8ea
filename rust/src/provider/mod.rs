//! One capability interface over the messaging backends (Meta Cloud API, Baileys, Z-API).
//!
//! The core never branches on which backend it is talking to; it picks one implementation
//! of [`MessagingProvider`] up front and routes every call through it.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::echo::SendAck;
use crate::model::{Conversation, Message};
use crate::state::ProviderKind;

pub use memory::{MemoryCalls, MemoryProvider};

/// One push-channel frame as the transport delivered it: the transport event name, if the
/// transport has one, and the JSON body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    #[serde(default)]
    pub event: Option<String>,
    pub data: String,
}

pub type FrameStream = BoxStream<'static, Result<RawFrame, ProviderError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    /// Only messages older than this one.
    pub before_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendRequest {
    pub phone: String,
    pub content: String,
    pub lead_id: Option<i64>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{0:?} provider is not connected")]
    NotConnected(ProviderKind),
    #[error("rejected by provider: {0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn is_connected(&self) -> bool;

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ProviderError>;

    /// Newest `page.limit` messages of the conversation (older than `page.before_id` when
    /// set). Order is unspecified.
    async fn list_messages(
        &self,
        phone: &str,
        page: PageRequest,
    ) -> Result<Vec<Message>, ProviderError>;

    async fn send_message(&self, request: SendRequest) -> Result<SendAck, ProviderError>;

    async fn mark_as_read(&self, message_id: i64) -> Result<(), ProviderError>;

    /// Opens the push channel for a session, optionally scoped to one conversation. The
    /// stream ending or yielding an error means the channel dropped.
    async fn subscribe(
        &self,
        session_id: &str,
        phone: Option<&str>,
    ) -> Result<FrameStream, ProviderError>;
}

/// Connected provider of highest priority (Meta > Baileys > Zapi).
pub fn select_provider(
    providers: &[Arc<dyn MessagingProvider>],
) -> Option<Arc<dyn MessagingProvider>> {
    providers
        .iter()
        .filter(|p| p.is_connected())
        .max_by_key(|p| p.kind().priority())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_prefers_connected_by_priority() {
        let meta = MemoryProvider::new(ProviderKind::Meta);
        let baileys = MemoryProvider::new(ProviderKind::Baileys);
        let zapi = MemoryProvider::new(ProviderKind::Zapi);
        let all: Vec<Arc<dyn MessagingProvider>> = vec![
            Arc::new(zapi.clone()),
            Arc::new(meta.clone()),
            Arc::new(baileys.clone()),
        ];
        assert_eq!(select_provider(&all).map(|p| p.kind()), Some(ProviderKind::Meta));

        meta.set_connected(false);
        assert_eq!(
            select_provider(&all).map(|p| p.kind()),
            Some(ProviderKind::Baileys)
        );

        baileys.set_connected(false);
        zapi.set_connected(false);
        assert!(select_provider(&all).is_none());
    }
}
