mod channel;
mod config;
mod history;
mod outbound;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use flume::Sender;
use tokio::task::JoinHandle;

use crate::actions::AppAction;
use crate::events::{normalize, ChatEvent};
use crate::phone::{phones_match, to_whatsapp_address};
use crate::presence::TypingTimer;
use crate::provider::{select_provider, MessagingProvider};
use crate::session::{ChatSession, Effects};
use crate::state::{now_millis, AppState, ConnectionState};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

pub(crate) use config::default_app_config_json;

use channel::ChannelTask;
use history::HistoryGate;

struct TypingTimerTask {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    providers: Vec<Arc<dyn MessagingProvider>>,
    provider: Option<Arc<dyn MessagingProvider>>,

    // All reconciliation state; the actor only wires I/O around it.
    session: ChatSession,

    channel_token: u64,
    channel: Option<ChannelTask>,
    scoped_channel: Option<ChannelTask>,

    typing_timers: HashMap<String, TypingTimerTask>,

    conversations_in_flight: bool,
    conversations_dirty: bool,
    history: HistoryGate,
    older_in_flight: bool,
    sends_in_flight: HashSet<i64>,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        providers: Vec<Arc<dyn MessagingProvider>>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let session = ChatSession::new(config.session_settings());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            providers,
            provider: None,
            session,
            channel_token: 0,
            channel: None,
            scoped_channel: None,
            typing_timers: HashMap::new(),
            conversations_in_flight: false,
            conversations_dirty: false,
            history: HistoryGate::default(),
            older_in_flight: false,
            sends_in_flight: HashSet::new(),
        };

        // Ensure ChatApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    /// Picks a provider, opens the push channel and loads the conversation list.
    pub fn start(&mut self) {
        self.ensure_provider();
        if self.channel.is_none() {
            self.open_channel(None);
        }
        self.refresh_conversations();
        self.refresh_views();
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Stays until the UI clears it, so a snapshot resync still shows it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    /// Re-projects the session into `AppState` and publishes it.
    fn refresh_views(&mut self) {
        let now = now_millis();
        self.state.chat_list = self.session.summaries(now);
        self.state.chat_list_stale = self.session.chat_list_stale();
        self.state.current_chat = self.session.chat_view(now);
        self.state.busy.fetching_conversations = self.conversations_in_flight;
        self.state.busy.fetching_history = self.history.is_busy();
        self.state.busy.loading_older = self.older_in_flight;
        self.state.busy.sending = !self.sends_in_flight.is_empty();
        self.emit_state();
    }

    fn ensure_provider(&mut self) {
        if self.provider.as_ref().is_some_and(|p| p.is_connected()) {
            return;
        }
        let selected = select_provider(&self.providers);
        let changed =
            selected.as_ref().map(|p| p.kind()) != self.provider.as_ref().map(|p| p.kind());
        match &selected {
            Some(p) => tracing::info!(provider = ?p.kind(), "provider selected"),
            None => tracing::warn!(available = self.providers.len(), "no connected provider"),
        }
        self.provider = selected;
        self.state.provider = self.provider.as_ref().map(|p| p.kind());
        if changed {
            self.stop_channels();
            if self.provider.is_none() {
                self.state.connection = ConnectionState {
                    last_error: Some("no connected provider".into()),
                    ..ConnectionState::disconnected()
                };
            }
        }
    }

    /// Carries out what a session transition asked for, then republishes.
    fn apply_effects(&mut self, fx: Effects) {
        if fx.is_noop() {
            return;
        }
        for phone in &fx.cancel_typing {
            if let Some(timer) = self.typing_timers.remove(phone) {
                timer.handle.abort();
            }
        }
        if let Some(timer) = fx.arm_typing {
            self.arm_typing_timer(timer);
        }
        if fx.refresh_conversations {
            self.refresh_conversations();
        }
        if fx.refetch_history {
            self.fetch_history();
        }
        if fx.timeline_changed {
            self.submit_read_receipts();
        }
        self.refresh_views();
    }

    /// [`Self::apply_effects`] for callers that also changed actor-side state: publishes even
    /// when the session reported nothing.
    fn publish_effects(&mut self, fx: Effects) {
        if fx.is_noop() {
            self.refresh_views();
        } else {
            self.apply_effects(fx);
        }
    }

    fn arm_typing_timer(&mut self, timer: TypingTimer) {
        let ttl = self.config.typing_ttl_ms as i64;
        let delay = (timer.fires_at - now_millis()).clamp(0, ttl) as u64;
        let tx = self.core_sender.clone();
        let phone = timer.phone.clone();
        let generation = timer.generation;
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::TypingExpired {
                phone,
                generation,
            })));
        });
        if let Some(prev) = self
            .typing_timers
            .insert(timer.phone, TypingTimerTask { generation, handle })
        {
            prev.handle.abort();
        }
    }

    fn cancel_all_typing_timers(&mut self) {
        for (_, timer) in self.typing_timers.drain() {
            timer.handle.abort();
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it carries message content and phone numbers.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::ChannelOpened { token, scope } => self.on_channel_opened(token, scope),
            InternalEvent::FrameReceived {
                token,
                frame,
                received_at,
            } => {
                if !self.is_current_channel(token) {
                    tracing::debug!(token, "frame from a closed channel ignored");
                    return;
                }
                let event = match normalize(frame.event.as_deref(), &frame.data, received_at) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(event = ?frame.event, %e, "dropping push frame");
                        return;
                    }
                };
                tracing::debug!(kind = event.tag(), "push event");
                if let ChatEvent::Connected { session_id } = &event {
                    tracing::info!(session_id = ?session_id, "push channel acknowledged");
                }
                let fx = self.session.apply_event(event, received_at);
                self.apply_effects(fx);
            }
            InternalEvent::ChannelDropped {
                token,
                scope,
                attempt,
                error,
            } => self.on_channel_dropped(token, scope, attempt, error),
            InternalEvent::ConversationsFetched { result } => {
                self.on_conversations_fetched(result)
            }
            InternalEvent::HistoryFetched { request, result } => {
                self.on_history_fetched(request, result)
            }
            InternalEvent::OlderFetched { request, result } => {
                self.on_older_fetched(request, result)
            }
            InternalEvent::SendCompleted { local_id, result } => {
                self.on_send_completed(local_id, result)
            }
            InternalEvent::MarkReadCompleted { message_id, result } => match result {
                Ok(()) => {
                    let fx = self.session.mark_read_applied(message_id, now_millis());
                    self.apply_effects(fx);
                }
                Err(e) => {
                    // Not resubmitted: each id is marked at most once per open conversation.
                    tracing::warn!(message_id, %e, "mark as read failed");
                }
            },
            InternalEvent::TypingExpired { phone, generation } => {
                if self
                    .typing_timers
                    .get(&phone)
                    .is_some_and(|t| t.generation == generation)
                {
                    self.typing_timers.remove(&phone);
                }
                let fx = self.session.expire_typing(&phone, generation);
                self.apply_effects(fx);
            }
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::RefreshConversations => {
                self.ensure_provider();
                self.refresh_conversations();
                self.refresh_views();
            }
            AppAction::OpenConversation { phone } => {
                let known = self
                    .state
                    .chat_list
                    .iter()
                    .any(|c| phones_match(&c.phone, &phone));
                let phone = if known {
                    phone
                } else {
                    to_whatsapp_address(&phone)
                };
                if phone.is_empty() {
                    self.toast("Invalid phone number");
                    return;
                }
                let switching = !self
                    .session
                    .open_phone()
                    .is_some_and(|p| phones_match(p, &phone));
                let fx = self.session.open(&phone);
                if switching && self.config.scoped_subscriptions {
                    let scope = self.session.open_phone().map(str::to_string);
                    self.open_channel(scope);
                }
                self.apply_effects(fx);
            }
            AppAction::CloseConversation => {
                self.stop_scoped_channel();
                let fx = self.session.close();
                self.apply_effects(fx);
            }
            AppAction::RefreshMessages => {
                self.fetch_history();
                self.refresh_views();
            }
            AppAction::LoadOlderMessages { limit } => {
                self.load_older(limit);
                self.refresh_views();
            }
            AppAction::UpdateDraft { text } => {
                let fx = self.session.update_draft(text);
                self.apply_effects(fx);
            }
            AppAction::SendMessage { content } => self.send_message(content),
            AppAction::RetryMessage { local_id } => self.retry_message(local_id),
            AppAction::DiscardMessage { local_id } => {
                let fx = self.session.discard(local_id);
                self.apply_effects(fx);
            }
            AppAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }
            AppAction::Foregrounded => {
                self.ensure_provider();
                if self.channel.is_none() {
                    self.open_channel(None);
                }
                if self.config.scoped_subscriptions && self.scoped_channel.is_none() {
                    if let Some(scope) = self.session.open_phone().map(str::to_string) {
                        self.open_channel(Some(scope));
                    }
                }
                self.refresh_conversations();
                self.fetch_history();
                self.refresh_views();
            }
            AppAction::Teardown => {
                self.stop_channels();
                let fx = self.session.teardown();
                self.cancel_all_typing_timers();
                self.state.connection = ConnectionState::disconnected();
                self.publish_effects(fx);
            }
        }
    }
}
