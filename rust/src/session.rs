//! All reconciliation state for one chat surface, owned in one place.
//!
//! `ChatSession` does no I/O and reads no clock: every transition takes `now` explicitly and
//! returns [`Effects`] describing what the caller should do next (fetch, arm a timer,
//! publish). The actor in `core` wires those effects to the provider and the runtime.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{FixedOffset, Offset, Utc};

use crate::bounded::BoundedSet;
use crate::echo::{EchoBook, EchoState, PendingEcho, SendAck};
use crate::events::ChatEvent;
use crate::model::{Conversation, Direction, Message, MessageStatus, StatusPatch};
use crate::phone::{normalize_phone, phones_match};
use crate::presence::{PresenceTracker, TypingTimer};
use crate::reactions::ReactionBook;
use crate::receipts::ReadReceipts;
use crate::reconcile::{merge, TimelineEntry};
use crate::state::{ChatMessage, ChatSummary, ChatViewState, TimelineItem};

// Replayed `new-message` frames for conversations that are not open are recognised by id.
const SEEN_CAP: usize = 2048;
// Read overrides outlive the fetch that would carry them, but not forever.
const OVERRIDE_CAP: usize = 4096;

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub self_phone: Option<String>,
    pub typing_ttl_ms: u64,
    pub echo_match_skew_ms: u64,
    pub history_page_size: u32,
    pub utc_offset: FixedOffset,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            self_phone: None,
            typing_ttl_ms: 4_500,
            echo_match_skew_ms: 120_000,
            history_page_size: 50,
            utc_offset: Utc.fix(),
        }
    }
}

/// What a transition asks of the caller.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Effects {
    pub timeline_changed: bool,
    pub chat_list_changed: bool,
    pub refetch_history: bool,
    pub refresh_conversations: bool,
    pub arm_typing: Option<TypingTimer>,
    /// Phones whose typing timers must be cancelled.
    pub cancel_typing: Vec<String>,
}

impl Effects {
    pub fn is_noop(&self) -> bool {
        *self == Effects::default()
    }
}

/// A history fetch the caller should issue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryRequest {
    pub phone: String,
    pub token: u64,
    pub limit: u32,
    pub before_id: Option<i64>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendRejected {
    #[error("no conversation is open")]
    NoConversation,
    #[error("message is empty")]
    Empty,
}

#[derive(Debug)]
struct OpenConversation {
    phone: String,
    history: BTreeMap<i64, Message>,
    // Live `new-message` arrivals not yet covered by a fetch.
    live: BTreeMap<i64, Message>,
    can_load_older: bool,
    stale: bool,
    // Fetch tokens are session-wide; anything at or below `opened_at` predates this open.
    opened_at: u64,
    fetch_applied: u64,
    draft: String,
    send_error: Option<String>,
    timeline: Vec<TimelineEntry>,
}

impl OpenConversation {
    fn new(phone: String, opened_at: u64) -> Self {
        Self {
            phone,
            history: BTreeMap::new(),
            live: BTreeMap::new(),
            can_load_older: false,
            stale: false,
            opened_at,
            fetch_applied: opened_at,
            draft: String::new(),
            send_error: None,
            timeline: vec![],
        }
    }

    fn upsert(&mut self, message: Message) {
        self.live.remove(&message.id);
        match self.history.get_mut(&message.id) {
            Some(existing) if existing.status.rank() > message.status.rank() => {
                let status = existing.status;
                let read_at = existing.read_at.or(message.read_at);
                *existing = message;
                existing.status = status;
                existing.read_at = read_at;
            }
            _ => {
                self.history.insert(message.id, message);
            }
        }
    }

    fn contains(&self, id: i64) -> bool {
        self.history.contains_key(&id) || self.live.contains_key(&id)
    }

    fn oldest_confirmed(&self) -> Option<&Message> {
        self.history.values().min_by_key(|m| (m.created_at, m.id))
    }
}

#[derive(Debug)]
pub struct ChatSession {
    settings: SessionSettings,
    conversations: Vec<Conversation>,
    list_stale: bool,
    list_loaded: bool,
    open: Option<OpenConversation>,
    overrides: HashMap<i64, StatusPatch>,
    override_order: VecDeque<i64>,
    echoes: EchoBook,
    reactions: ReactionBook,
    presence: PresenceTracker,
    receipts: ReadReceipts,
    fetch_token: u64,
    seen: BoundedSet<i64>,
}

impl ChatSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            echoes: EchoBook::new(settings.echo_match_skew_ms),
            presence: PresenceTracker::new(settings.typing_ttl_ms),
            settings,
            conversations: vec![],
            list_stale: false,
            list_loaded: false,
            open: None,
            overrides: HashMap::new(),
            override_order: VecDeque::new(),
            reactions: ReactionBook::default(),
            receipts: ReadReceipts::default(),
            fetch_token: 0,
            seen: BoundedSet::new(SEEN_CAP),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn open_phone(&self) -> Option<&str> {
        self.open.as_ref().map(|c| c.phone.as_str())
    }

    fn is_open(&self, phone: &str) -> bool {
        self.open_phone().is_some_and(|p| phones_match(p, phone))
    }

    // Conversation lifecycle

    /// Opens a conversation. Switching away clears the previous conversation's typing state
    /// and live buffer rather than hiding them.
    pub fn open(&mut self, phone: &str) -> Effects {
        let phone = normalize_phone(phone);
        if phone.is_empty() {
            return Effects::default();
        }
        if self.is_open(&phone) {
            return Effects {
                refetch_history: true,
                ..Effects::default()
            };
        }
        let mut fx = self.close();
        let phone = self
            .conversations
            .iter()
            .find(|c| phones_match(&c.phone, &phone))
            .map(|c| normalize_phone(&c.phone))
            .unwrap_or(phone);

        self.receipts.open(&phone);
        self.fetch_token += 1;
        let mut view = OpenConversation::new(phone.clone(), self.fetch_token);
        view.timeline = merge(
            &[],
            &self.overrides,
            self.echoes.for_phone(&phone),
            self.settings.utc_offset,
        );
        self.open = Some(view);
        if let Some(c) = self
            .conversations
            .iter_mut()
            .find(|c| phones_match(&c.phone, &phone))
        {
            if c.unread_count != 0 {
                c.unread_count = 0;
                fx.chat_list_changed = true;
            }
        }
        fx.timeline_changed = true;
        fx.refetch_history = true;
        fx
    }

    pub fn close(&mut self) -> Effects {
        let Some(prev) = self.open.take() else {
            return Effects::default();
        };
        self.receipts.close();
        let mut fx = Effects {
            timeline_changed: true,
            ..Effects::default()
        };
        if let Some(key) = self.presence.clear_phone(&prev.phone) {
            fx.cancel_typing.push(key);
            fx.chat_list_changed = true;
        }
        fx
    }

    /// Drops every piece of ephemeral state. Pending echoes survive so in-flight sends can
    /// still resolve against them by id.
    pub fn teardown(&mut self) -> Effects {
        let mut fx = self.close();
        let cleared = self.presence.clear_typing();
        if !cleared.is_empty() {
            fx.chat_list_changed = true;
        }
        for phone in cleared {
            if !fx.cancel_typing.contains(&phone) {
                fx.cancel_typing.push(phone);
            }
        }
        fx
    }

    // History

    /// Starts a refresh of the open conversation: the newest `max(page size, loaded)`
    /// messages.
    pub fn begin_history_fetch(&mut self) -> Option<HistoryRequest> {
        let page = self.settings.history_page_size;
        let view = self.open.as_ref()?;
        self.fetch_token += 1;
        Some(HistoryRequest {
            phone: view.phone.clone(),
            token: self.fetch_token,
            limit: page.max(view.history.len() as u32),
            before_id: None,
        })
    }

    /// Applies a refresh. Results for a conversation no longer open, or older than one
    /// already applied, are dropped.
    pub fn apply_history(
        &mut self,
        request: &HistoryRequest,
        messages: Vec<Message>,
    ) -> Effects {
        let Some(view) = self.open.as_mut() else {
            return Effects::default();
        };
        if !phones_match(&view.phone, &request.phone) || request.token <= view.fetch_applied {
            tracing::debug!(token = request.token, "stale history result ignored");
            return Effects::default();
        }
        view.fetch_applied = request.token;
        view.stale = false;
        view.can_load_older = messages.len() as u32 >= request.limit;
        self.absorb_fetched(messages);
        self.rebuild();
        Effects {
            timeline_changed: true,
            ..Effects::default()
        }
    }

    /// A failed refresh keeps the last merged view and flags it stale.
    pub fn history_failed(&mut self, request: &HistoryRequest) -> Effects {
        let Some(view) = self.open.as_mut() else {
            return Effects::default();
        };
        if !phones_match(&view.phone, &request.phone) || request.token <= view.fetch_applied {
            return Effects::default();
        }
        if view.stale {
            return Effects::default();
        }
        view.stale = true;
        Effects {
            timeline_changed: true,
            ..Effects::default()
        }
    }

    /// Page of messages older than the oldest confirmed one, or `None` when there is
    /// nothing more to load.
    pub fn begin_load_older(&mut self, limit: u32) -> Option<HistoryRequest> {
        let view = self.open.as_ref()?;
        if !view.can_load_older {
            return None;
        }
        let oldest = view.oldest_confirmed()?;
        Some(HistoryRequest {
            phone: view.phone.clone(),
            token: self.fetch_token,
            limit: limit.max(1),
            before_id: Some(oldest.id),
        })
    }

    pub fn apply_older(&mut self, request: &HistoryRequest, messages: Vec<Message>) -> Effects {
        let Some(view) = self.open.as_mut() else {
            return Effects::default();
        };
        if !phones_match(&view.phone, &request.phone) || request.token < view.opened_at {
            tracing::debug!(token = request.token, "older page from a previous open ignored");
            return Effects::default();
        }
        view.can_load_older = messages.len() as u32 >= request.limit;
        self.absorb_fetched(messages);
        self.rebuild();
        Effects {
            timeline_changed: true,
            ..Effects::default()
        }
    }

    fn absorb_fetched(&mut self, mut messages: Vec<Message>) {
        messages.sort_by_key(|m| (m.created_at, m.id));
        for m in &messages {
            self.reactions.absorb_fetched(&m.reactions);
            if let Some(retired) = self.echoes.observe_confirmed(m) {
                tracing::debug!(local_id = retired.local_id, id = m.id, "echo confirmed by fetch");
            }
            self.remember(m.id);
        }
        if let Some(view) = self.open.as_mut() {
            for m in messages {
                view.upsert(m);
            }
        }
    }

    // Conversation list

    /// Merges a fetched list. Local entries the fetch does not know about are kept, and a
    /// local preview newer than the fetched one wins.
    pub fn apply_conversations(&mut self, fetched: Vec<Conversation>) -> Effects {
        self.list_stale = false;
        self.list_loaded = true;
        let open_phone = self.open_phone().map(str::to_string);
        for mut incoming in fetched {
            incoming.phone = normalize_phone(&incoming.phone);
            if open_phone.as_deref().is_some_and(|p| phones_match(p, &incoming.phone)) {
                incoming.unread_count = 0;
            }
            match self
                .conversations
                .iter_mut()
                .find(|c| phones_match(&c.phone, &incoming.phone))
            {
                Some(existing) => {
                    if existing.last_message_at > incoming.last_message_at {
                        incoming.last_message = existing.last_message.clone();
                        incoming.last_message_at = existing.last_message_at;
                    }
                    incoming.phone = existing.phone.clone();
                    *existing = incoming;
                }
                None => self.conversations.push(incoming),
            }
        }
        Effects {
            chat_list_changed: true,
            ..Effects::default()
        }
    }

    pub fn conversations_failed(&mut self) -> Effects {
        if self.list_stale {
            return Effects::default();
        }
        self.list_stale = true;
        Effects {
            chat_list_changed: true,
            ..Effects::default()
        }
    }

    pub fn chat_list_stale(&self) -> bool {
        self.list_stale
    }

    pub fn list_loaded(&self) -> bool {
        self.list_loaded
    }

    fn touch_conversation(&mut self, message: &Message, count_unread: bool) {
        let idx = match self
            .conversations
            .iter()
            .position(|c| phones_match(&c.phone, &message.phone))
        {
            Some(idx) => idx,
            None => {
                self.conversations.push(Conversation {
                    phone: normalize_phone(&message.phone),
                    name: message.sender_name.clone(),
                    lead_id: None,
                    last_message: None,
                    last_message_at: None,
                    unread_count: 0,
                });
                self.conversations.len() - 1
            }
        };
        let c = &mut self.conversations[idx];
        if c.last_message_at.map_or(true, |at| at <= message.created_at) {
            c.last_message = Some(message.content.clone());
            c.last_message_at = Some(message.created_at);
        }
        if count_unread && message.direction == Direction::Inbound {
            c.unread_count += 1;
        }
    }

    // Push events

    pub fn apply_event(&mut self, event: ChatEvent, now: i64) -> Effects {
        match event {
            ChatEvent::Connected { .. } => Effects::default(),
            ChatEvent::NewMessage { phone, mut message } => {
                message.phone = normalize_phone(&phone);
                self.on_new_message(message)
            }
            ChatEvent::MessageRead {
                message_id,
                status,
                read_at,
                ..
            } => {
                let read_at = match status {
                    MessageStatus::Read => read_at.or(Some(now)),
                    _ => read_at,
                };
                self.apply_patch(message_id, StatusPatch { status, read_at })
            }
            ChatEvent::TypingStart { phone, at } => match self.presence.typing_start(&phone, at) {
                Some(timer) => Effects {
                    timeline_changed: self.is_open(&phone),
                    chat_list_changed: true,
                    arm_typing: Some(timer),
                    ..Effects::default()
                },
                None => Effects::default(),
            },
            ChatEvent::TypingStop { phone } => {
                if self.presence.typing_stop(&phone) {
                    self.presence_changed(&phone)
                } else {
                    Effects::default()
                }
            }
            ChatEvent::ContactOnline { phone } => {
                if self.presence.set_online(&phone, true) {
                    self.presence_changed(&phone)
                } else {
                    Effects::default()
                }
            }
            ChatEvent::ContactOffline { phone } => {
                if self.presence.set_online(&phone, false) {
                    self.presence_changed(&phone)
                } else {
                    Effects::default()
                }
            }
            ChatEvent::ReactionAdded { reaction } => {
                let message_id = reaction.message_id;
                if self.reactions.add(reaction) {
                    self.reaction_changed(message_id)
                } else {
                    Effects::default()
                }
            }
            ChatEvent::ReactionRemoved { reaction_id, .. } => {
                if self.reactions.remove(reaction_id) {
                    Effects {
                        timeline_changed: self.open.is_some(),
                        ..Effects::default()
                    }
                } else {
                    Effects::default()
                }
            }
        }
    }

    fn on_new_message(&mut self, message: Message) -> Effects {
        let open = self.is_open(&message.phone);
        let replay = self.seen.contains(&message.id)
            || self.open.as_ref().is_some_and(|v| v.contains(message.id));
        if replay {
            tracing::debug!(id = message.id, "duplicate new-message ignored");
            return Effects::default();
        }
        self.remember(message.id);
        self.reactions.absorb_fetched(&message.reactions);
        let retired = self.echoes.observe_confirmed(&message);
        if let Some(echo) = &retired {
            tracing::debug!(local_id = echo.local_id, id = message.id, "echo confirmed by push");
        }
        self.touch_conversation(&message, !open);

        let mut fx = Effects {
            chat_list_changed: true,
            ..Effects::default()
        };
        if open {
            if let Some(view) = self.open.as_mut() {
                view.live.insert(message.id, message);
            }
            self.rebuild();
            fx.timeline_changed = true;
            fx.refetch_history = true;
        } else {
            fx.refresh_conversations = true;
        }
        fx
    }

    fn apply_patch(&mut self, message_id: i64, patch: StatusPatch) -> Effects {
        let changed = match self.overrides.get_mut(&message_id) {
            Some(existing) => {
                let before = existing.clone();
                existing.absorb(patch);
                *existing != before
            }
            None => {
                self.overrides.insert(message_id, patch);
                self.override_order.push_back(message_id);
                while self.override_order.len() > OVERRIDE_CAP {
                    if let Some(old) = self.override_order.pop_front() {
                        self.overrides.remove(&old);
                    }
                }
                true
            }
        };
        if !changed {
            return Effects::default();
        }
        let visible = self.open.as_ref().is_some_and(|v| v.contains(message_id));
        if visible {
            self.rebuild();
        }
        Effects {
            timeline_changed: visible,
            ..Effects::default()
        }
    }

    fn presence_changed(&self, phone: &str) -> Effects {
        Effects {
            timeline_changed: self.is_open(phone),
            chat_list_changed: true,
            ..Effects::default()
        }
    }

    fn reaction_changed(&self, message_id: i64) -> Effects {
        Effects {
            timeline_changed: self.open.as_ref().is_some_and(|v| v.contains(message_id)),
            ..Effects::default()
        }
    }

    fn remember(&mut self, id: i64) {
        self.seen.insert(id);
    }

    /// Typing timer callback.
    pub fn expire_typing(&mut self, phone: &str, generation: u64) -> Effects {
        if self.presence.expire(phone, generation) {
            self.presence_changed(phone)
        } else {
            Effects::default()
        }
    }

    pub fn is_typing(&self, phone: &str, now: i64) -> bool {
        self.presence.is_typing(phone, now)
    }

    pub fn is_online(&self, phone: &str) -> bool {
        self.presence.is_online(phone)
    }

    // Outbound

    pub fn update_draft(&mut self, text: String) -> Effects {
        match self.open.as_mut() {
            Some(view) if view.draft != text => {
                view.draft = text;
                Effects {
                    timeline_changed: true,
                    ..Effects::default()
                }
            }
            _ => Effects::default(),
        }
    }

    /// Creates the optimistic echo for a send to the open conversation.
    pub fn start_send(&mut self, content: &str, now: i64) -> Result<PendingEcho, SendRejected> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SendRejected::Empty);
        }
        let phone = self
            .open_phone()
            .map(str::to_string)
            .ok_or(SendRejected::NoConversation)?;
        let lead_id = self
            .conversations
            .iter()
            .find(|c| phones_match(&c.phone, &phone))
            .and_then(|c| c.lead_id);
        let echo = self.echoes.create(&phone, content.to_string(), lead_id, now);
        if let Some(view) = self.open.as_mut() {
            view.send_error = None;
        }
        self.rebuild();
        Ok(echo)
    }

    /// Send accepted. Clears the draft when the echo's conversation is still open and the
    /// draft still holds the sent text, then asks for the refetches that will bring the
    /// confirmed message in.
    pub fn send_succeeded(&mut self, local_id: i64, ack: SendAck) -> Effects {
        let Some((phone, content)) = self
            .echoes
            .get(local_id)
            .map(|e| (e.phone.clone(), e.content.clone()))
        else {
            tracing::debug!(local_id, "send result for a retired echo");
            return Effects {
                refresh_conversations: true,
                ..Effects::default()
            };
        };
        if let Some(retired) = self.echoes.acknowledge(local_id, ack) {
            tracing::debug!(local_id = retired.local_id, "echo confirmed by ack");
        }
        let open = self.is_open(&phone);
        if open {
            if let Some(view) = self.open.as_mut() {
                if view.draft.trim() == content {
                    view.draft.clear();
                }
            }
            self.rebuild();
        }
        Effects {
            timeline_changed: open,
            chat_list_changed: true,
            refetch_history: open,
            refresh_conversations: true,
            ..Effects::default()
        }
    }

    /// Send failed: the echo stays visible as failed until retried or discarded.
    pub fn send_failed(&mut self, local_id: i64, reason: String) -> Effects {
        let Some(phone) = self.echoes.get(local_id).map(|e| e.phone.clone()) else {
            return Effects::default();
        };
        if !self.echoes.fail(local_id, reason.clone()) {
            return Effects::default();
        }
        let open = self.is_open(&phone);
        if open {
            if let Some(view) = self.open.as_mut() {
                view.send_error = Some(reason);
            }
            self.rebuild();
        }
        Effects {
            timeline_changed: open,
            ..Effects::default()
        }
    }

    pub fn retry(&mut self, local_id: i64) -> Option<PendingEcho> {
        let echo = self.echoes.retry(local_id)?;
        if let Some(view) = self.open.as_mut() {
            view.send_error = None;
        }
        self.rebuild();
        Some(echo)
    }

    pub fn discard(&mut self, local_id: i64) -> Effects {
        if !self.echoes.discard(local_id) {
            return Effects::default();
        }
        if let Some(view) = self.open.as_mut() {
            view.send_error = None;
        }
        self.rebuild();
        Effects {
            timeline_changed: self.open.is_some(),
            chat_list_changed: true,
            ..Effects::default()
        }
    }

    pub fn echo(&self, local_id: i64) -> Option<&PendingEcho> {
        self.echoes.get(local_id)
    }

    // Read receipts

    /// Inbound messages of the open conversation to mark as read now; each id is returned at
    /// most once while the conversation stays open.
    pub fn take_unread(&mut self) -> Vec<i64> {
        let Some(view) = self.open.as_ref() else {
            return vec![];
        };
        self.receipts
            .collect(view.timeline.iter().filter_map(TimelineEntry::message))
    }

    /// Reflects an accepted mark-as-read locally.
    pub fn mark_read_applied(&mut self, message_id: i64, now: i64) -> Effects {
        self.apply_patch(
            message_id,
            StatusPatch {
                status: MessageStatus::Read,
                read_at: Some(now),
            },
        )
    }

    // Projection

    fn rebuild(&mut self) {
        let Some(view) = self.open.as_mut() else {
            return;
        };
        let mut all: Vec<Message> = view.history.values().cloned().collect();
        all.extend(view.live.values().cloned());
        view.timeline = merge(
            &all,
            &self.overrides,
            self.echoes.for_phone(&view.phone),
            self.settings.utc_offset,
        );
    }

    /// Current merged sequence of the open conversation.
    pub fn timeline(&self) -> &[TimelineEntry] {
        self.open.as_ref().map(|v| v.timeline.as_slice()).unwrap_or(&[])
    }

    pub fn summaries(&self, now: i64) -> Vec<ChatSummary> {
        let mut list: Vec<ChatSummary> = self
            .conversations
            .iter()
            .map(|c| {
                let newest_echo = self
                    .echoes
                    .for_phone(&c.phone)
                    .iter()
                    .max_by_key(|e| e.created_at);
                let (last_message, last_message_at) = match newest_echo {
                    Some(e) if c.last_message_at.map_or(true, |at| e.created_at > at) => {
                        (Some(e.content.clone()), Some(e.created_at))
                    }
                    _ => (c.last_message.clone(), c.last_message_at),
                };
                ChatSummary {
                    phone: c.phone.clone(),
                    name: c.name.clone(),
                    lead_id: c.lead_id,
                    last_message,
                    last_message_at,
                    unread_count: c.unread_count,
                    is_online: self.presence.is_online(&c.phone),
                    is_typing: self.presence.is_typing(&c.phone, now),
                }
            })
            .collect();
        list.sort_by_key(|c| std::cmp::Reverse(c.last_message_at.unwrap_or(0)));
        list
    }

    pub fn chat_view(&self, now: i64) -> Option<ChatViewState> {
        let view = self.open.as_ref()?;
        let conversation = self
            .conversations
            .iter()
            .find(|c| phones_match(&c.phone, &view.phone));
        let mut reactions = self.reactions.summaries(self.settings.self_phone.as_deref());
        let items = view
            .timeline
            .iter()
            .map(|entry| match entry {
                TimelineEntry::DayBoundary { date } => TimelineItem::DayMarker {
                    date: date.format("%Y-%m-%d").to_string(),
                },
                TimelineEntry::Message { message, local } => {
                    let failure_reason = if *local {
                        self.echoes.get(message.id).and_then(|e| match &e.state {
                            EchoState::Failed { reason } => Some(reason.clone()),
                            _ => None,
                        })
                    } else {
                        None
                    };
                    TimelineItem::Message {
                        message: ChatMessage {
                            id: message.id,
                            direction: message.direction,
                            content: message.content.clone(),
                            status: message.status,
                            media: message.media.clone(),
                            quoted_message_id: message.quoted_message_id,
                            sender_name: message.sender_name.clone(),
                            created_at: message.created_at,
                            read_at: message.read_at,
                            reactions: reactions.remove(&message.id).unwrap_or_default(),
                            is_local_echo: *local,
                            failure_reason,
                        },
                    }
                }
            })
            .collect();
        Some(ChatViewState {
            phone: view.phone.clone(),
            name: conversation.and_then(|c| c.name.clone()),
            lead_id: conversation.and_then(|c| c.lead_id),
            items,
            can_load_older: view.can_load_older,
            is_stale: view.stale,
            peer_typing: self.presence.is_typing(&view.phone, now),
            peer_online: self.presence.is_online(&view.phone),
            draft: view.draft.clone(),
            send_error: view.send_error.clone(),
        })
    }
}
