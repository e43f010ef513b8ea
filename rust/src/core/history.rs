// Conversation list and history fetches, and the read receipts they lead to.

use super::*;

use crate::model::{Conversation, Message};
use crate::provider::{PageRequest, ProviderError};
use crate::session::HistoryRequest;

/// At most one refresh per conversation in flight. A refresh requested meanwhile is
/// remembered and issued when the current one completes.
#[derive(Debug, Default)]
pub(super) struct HistoryGate {
    in_flight: Option<(String, u64)>,
    dirty: bool,
}

impl HistoryGate {
    pub(super) fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    fn owns(&self, request: &HistoryRequest) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|(phone, token)| {
                *token == request.token && phones_match(phone, &request.phone)
            })
    }
}

impl AppCore {
    pub(super) fn refresh_conversations(&mut self) {
        let Some(provider) = self.provider.clone() else {
            // Callers republish after issuing fetches.
            let _ = self.session.conversations_failed();
            return;
        };
        if self.conversations_in_flight {
            self.conversations_dirty = true;
            return;
        }
        self.conversations_in_flight = true;
        self.conversations_dirty = false;
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = provider.list_conversations().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ConversationsFetched { result },
            )));
        });
    }

    pub(super) fn on_conversations_fetched(
        &mut self,
        result: Result<Vec<Conversation>, ProviderError>,
    ) {
        self.conversations_in_flight = false;
        let fx = match result {
            Ok(list) => {
                tracing::debug!(count = list.len(), "conversations fetched");
                self.session.apply_conversations(list)
            }
            Err(e) => {
                tracing::warn!(%e, "conversation list fetch failed");
                self.session.conversations_failed()
            }
        };
        if self.conversations_dirty {
            self.refresh_conversations();
        }
        self.publish_effects(fx);
    }

    /// Refreshes the open conversation. Never auto-polled; issued on open, on live
    /// arrivals, after sends and on reconnect.
    pub(super) fn fetch_history(&mut self) {
        let Some(open) = self.session.open_phone().map(str::to_string) else {
            return;
        };
        if let Some((phone, _)) = &self.history.in_flight {
            if phones_match(phone, &open) {
                self.history.dirty = true;
                return;
            }
        }
        let Some(request) = self.session.begin_history_fetch() else {
            return;
        };
        let Some(provider) = self.provider.clone() else {
            let _ = self.session.history_failed(&request);
            return;
        };
        self.history.in_flight = Some((request.phone.clone(), request.token));
        self.history.dirty = false;
        let tx = self.core_sender.clone();
        let page = PageRequest {
            limit: request.limit,
            before_id: None,
        };
        self.runtime.spawn(async move {
            let result = provider.list_messages(&request.phone, page).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::HistoryFetched {
                request,
                result,
            })));
        });
    }

    pub(super) fn on_history_fetched(
        &mut self,
        request: HistoryRequest,
        result: Result<Vec<Message>, ProviderError>,
    ) {
        let owned = self.history.owns(&request);
        if owned {
            self.history.in_flight = None;
        }
        let fx = match result {
            Ok(messages) => {
                tracing::debug!(token = request.token, count = messages.len(), "history fetched");
                self.session.apply_history(&request, messages)
            }
            Err(e) => {
                tracing::warn!(token = request.token, %e, "history fetch failed");
                self.session.history_failed(&request)
            }
        };
        if owned && self.history.dirty {
            self.fetch_history();
        }
        self.publish_effects(fx);
    }

    pub(super) fn load_older(&mut self, limit: u32) {
        if self.older_in_flight {
            return;
        }
        let Some(provider) = self.provider.clone() else {
            self.state.toast = Some("Not connected".into());
            return;
        };
        let Some(request) = self.session.begin_load_older(limit) else {
            tracing::debug!("nothing older to load");
            return;
        };
        self.older_in_flight = true;
        let tx = self.core_sender.clone();
        let page = PageRequest {
            limit: request.limit,
            before_id: request.before_id,
        };
        self.runtime.spawn(async move {
            let result = provider.list_messages(&request.phone, page).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::OlderFetched {
                request,
                result,
            })));
        });
    }

    pub(super) fn on_older_fetched(
        &mut self,
        request: HistoryRequest,
        result: Result<Vec<Message>, ProviderError>,
    ) {
        self.older_in_flight = false;
        match result {
            Ok(messages) => {
                let fx = self.session.apply_older(&request, messages);
                self.publish_effects(fx);
            }
            Err(e) => {
                tracing::warn!(%e, "loading older messages failed");
                self.toast("Could not load older messages");
            }
        }
    }

    /// Marks every unread inbound message of the open conversation, once each.
    pub(super) fn submit_read_receipts(&mut self) {
        // Ids taken here count as submitted, so only take them when they can be sent.
        let Some(provider) = self.provider.clone() else {
            return;
        };
        let ids = self.session.take_unread();
        if ids.is_empty() {
            return;
        }
        tracing::debug!(count = ids.len(), "submitting read receipts");
        for message_id in ids {
            let provider = provider.clone();
            let tx = self.core_sender.clone();
            self.runtime.spawn(async move {
                let result = provider.mark_as_read(message_id).await;
                let _ = tx.send(CoreMsg::Internal(Box::new(
                    InternalEvent::MarkReadCompleted { message_id, result },
                )));
            });
        }
    }
}
