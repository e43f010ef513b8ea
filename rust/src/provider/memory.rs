use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{FrameStream, MessagingProvider, PageRequest, ProviderError, RawFrame, SendRequest};
use crate::echo::SendAck;
use crate::model::{Conversation, Direction, Message, MessageStatus};
use crate::phone::{normalize_phone, phones_match};
use crate::state::{now_millis, ProviderKind};

/// Call log of a [`MemoryProvider`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryCalls {
    pub list_conversations: u32,
    pub list_messages: u32,
    pub sends: Vec<SendRequest>,
    pub marked_read: Vec<i64>,
    pub subscribes: Vec<(String, Option<String>)>,
}

struct Subscriber {
    scope: Option<String>,
    tx: mpsc::UnboundedSender<RawFrame>,
}

#[derive(Default)]
struct Inner {
    connected: bool,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    next_id: i64,
    fail_sends: u32,
    fail_fetches: u32,
    fail_subscribes: u32,
    push_on_send: bool,
    subscribers: Vec<Subscriber>,
    calls: MemoryCalls,
}

/// In-process backend: seeded data, push injection and failure injection. Used by tests and
/// by the `chat_replay` tool.
#[derive(Clone)]
pub struct MemoryProvider {
    kind: ProviderKind,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            inner: Arc::new(Mutex::new(Inner {
                connected: true,
                next_id: 1000,
                ..Inner::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn seed_conversation(&self, conversation: Conversation) {
        let mut inner = self.lock();
        inner
            .conversations
            .retain(|c| !phones_match(&c.phone, &conversation.phone));
        inner.conversations.push(conversation);
    }

    pub fn seed_message(&self, message: Message) {
        let mut inner = self.lock();
        inner.next_id = inner.next_id.max(message.id + 1);
        inner.messages.retain(|m| m.id != message.id);
        inner.messages.push(message);
    }

    /// Makes the next `n` sends fail with a transport error.
    pub fn fail_next_sends(&self, n: u32) {
        self.lock().fail_sends = n;
    }

    pub fn fail_next_fetches(&self, n: u32) {
        self.lock().fail_fetches = n;
    }

    pub fn fail_next_subscribes(&self, n: u32) {
        self.lock().fail_subscribes = n;
    }

    /// When set, an accepted send also pushes the confirmed message as a `new-message` frame,
    /// the way the webhooks do.
    pub fn push_on_send(&self, enabled: bool) {
        self.lock().push_on_send = enabled;
    }

    /// Delivers a frame to every subscriber whose scope covers it.
    pub fn push(&self, event: Option<&str>, data: Value) -> usize {
        let phone = data.get("phone").and_then(Value::as_str).map(normalize_phone);
        let frame = RawFrame {
            event: event.map(str::to_string),
            data: data.to_string(),
        };
        let mut inner = self.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        let mut delivered = 0;
        for s in &inner.subscribers {
            let in_scope = match (&s.scope, &phone) {
                (Some(scope), Some(phone)) => phones_match(scope, phone),
                _ => true,
            };
            if in_scope && s.tx.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Ends every open stream, as a dropped connection would.
    pub fn drop_subscribers(&self) {
        self.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    pub fn calls(&self) -> MemoryCalls {
        self.lock().calls.clone()
    }

    fn take_failure(counter: &mut u32) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl MessagingProvider for MemoryProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ProviderError> {
        let mut inner = self.lock();
        inner.calls.list_conversations += 1;
        if Self::take_failure(&mut inner.fail_fetches) {
            return Err(ProviderError::Transport("injected fetch failure".into()));
        }
        Ok(inner.conversations.clone())
    }

    async fn list_messages(
        &self,
        phone: &str,
        page: PageRequest,
    ) -> Result<Vec<Message>, ProviderError> {
        let mut inner = self.lock();
        inner.calls.list_messages += 1;
        if Self::take_failure(&mut inner.fail_fetches) {
            return Err(ProviderError::Transport("injected fetch failure".into()));
        }
        let mut thread: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| phones_match(&m.phone, phone))
            .cloned()
            .collect();
        thread.sort_by_key(|m| (m.created_at, m.id));
        if let Some(before) = page.before_id {
            let cut = thread
                .iter()
                .position(|m| m.id == before)
                .ok_or_else(|| ProviderError::NotFound(format!("message {before}")))?;
            thread.truncate(cut);
        }
        let skip = thread.len().saturating_sub(page.limit as usize);
        Ok(thread.split_off(skip))
    }

    async fn send_message(&self, request: SendRequest) -> Result<SendAck, ProviderError> {
        let (ack, echo) = {
            let mut inner = self.lock();
            inner.calls.sends.push(request.clone());
            if !inner.connected {
                return Err(ProviderError::NotConnected(self.kind));
            }
            if Self::take_failure(&mut inner.fail_sends) {
                return Err(ProviderError::Transport("injected send failure".into()));
            }
            let id = inner.next_id;
            inner.next_id += 1;
            let message = Message {
                id,
                phone: normalize_phone(&request.phone),
                direction: Direction::Outbound,
                content: request.content.clone(),
                status: MessageStatus::Sent,
                media: None,
                quoted_message_id: None,
                sender_name: None,
                created_at: now_millis(),
                read_at: None,
                reactions: vec![],
            };
            inner.messages.push(message.clone());
            let ack = SendAck {
                id,
                status: message.status,
            };
            (ack, inner.push_on_send.then_some(message))
        };

        if let Some(message) = echo {
            let mut data = serde_json::to_value(&message)
                .map_err(|e| ProviderError::Transport(e.to_string()))?;
            data["type"] = Value::from("new-message");
            self.push(Some("new-message"), data);
        }
        Ok(ack)
    }

    async fn mark_as_read(&self, message_id: i64) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        inner.calls.marked_read.push(message_id);
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ProviderError::NotFound(format!("message {message_id}")))?;
        message.status = MessageStatus::Read;
        message.read_at = Some(now_millis());
        Ok(())
    }

    async fn subscribe(
        &self,
        session_id: &str,
        phone: Option<&str>,
    ) -> Result<FrameStream, ProviderError> {
        let mut inner = self.lock();
        inner
            .calls
            .subscribes
            .push((session_id.to_string(), phone.map(str::to_string)));
        if !inner.connected {
            return Err(ProviderError::NotConnected(self.kind));
        }
        if Self::take_failure(&mut inner.fail_subscribes) {
            return Err(ProviderError::Transport("injected subscribe failure".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push(Subscriber {
            scope: phone.map(normalize_phone),
            tx,
        });
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok(frame), rx))
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const X: &str = "5511999990000";

    fn message(id: i64, created_at: i64) -> Message {
        Message {
            id,
            phone: X.into(),
            direction: Direction::Inbound,
            content: format!("m{id}"),
            status: MessageStatus::Delivered,
            media: None,
            quoted_message_id: None,
            sender_name: None,
            created_at,
            read_at: None,
            reactions: vec![],
        }
    }

    #[tokio::test]
    async fn pages_newest_first_window() {
        let p = MemoryProvider::new(ProviderKind::Baileys);
        for i in 1..=5 {
            p.seed_message(message(i, i * 10));
        }
        let newest = p
            .list_messages(X, PageRequest { limit: 2, before_id: None })
            .await
            .unwrap();
        assert_eq!(newest.iter().map(|m| m.id).collect::<Vec<_>>(), vec![4, 5]);

        let older = p
            .list_messages(X, PageRequest { limit: 2, before_id: Some(4) })
            .await
            .unwrap();
        assert_eq!(older.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn injected_send_failure_is_consumed() {
        let p = MemoryProvider::new(ProviderKind::Zapi);
        p.fail_next_sends(1);
        let req = SendRequest {
            phone: X.into(),
            content: "oi".into(),
            lead_id: None,
        };
        assert!(p.send_message(req.clone()).await.is_err());
        let ack = p.send_message(req).await.unwrap();
        assert_eq!(ack.status, MessageStatus::Sent);
        assert_eq!(p.calls().sends.len(), 2);
    }

    #[tokio::test]
    async fn scoped_subscription_only_sees_its_phone() {
        let p = MemoryProvider::new(ProviderKind::Meta);
        let mut all = p.subscribe("s1", None).await.unwrap();
        let mut scoped = p.subscribe("s1", Some(X)).await.unwrap();

        assert_eq!(p.push(Some("typing-start"), json!({"phone": "5521988887777"})), 1);
        assert_eq!(p.push(Some("typing-start"), json!({"phone": X})), 2);

        let first = all.next().await.unwrap().unwrap();
        assert!(first.data.contains("5521988887777"));
        let only = scoped.next().await.unwrap().unwrap();
        assert!(only.data.contains(X));

        p.drop_subscribers();
        assert!(all.next().await.is_some());
        assert!(all.next().await.is_none());
    }
}
