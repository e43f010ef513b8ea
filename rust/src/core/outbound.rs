// Outbound send pipeline: optimistic echo, provider send, ack or failure.

use super::*;

use crate::echo::{PendingEcho, SendAck};
use crate::provider::{ProviderError, SendRequest};
use crate::session::SendRejected;

impl AppCore {
    pub(super) fn send_message(&mut self, content: String) {
        let echo = match self.session.start_send(&content, now_millis()) {
            Ok(echo) => echo,
            Err(SendRejected::Empty) => {
                tracing::debug!("empty message ignored");
                return;
            }
            Err(e @ SendRejected::NoConversation) => {
                tracing::warn!(%e, "send without an open conversation");
                self.toast("Open a conversation first");
                return;
            }
        };
        tracing::info!(local_id = echo.local_id, "send queued");
        self.dispatch_send(echo);
    }

    pub(super) fn retry_message(&mut self, local_id: i64) {
        match self.session.retry(local_id) {
            Some(echo) => {
                tracing::info!(local_id, "send retried");
                self.dispatch_send(echo);
            }
            None => tracing::debug!(local_id, "retry for an echo that is not failed"),
        }
    }

    fn dispatch_send(&mut self, echo: PendingEcho) {
        let Some(provider) = self.provider.clone() else {
            let fx = self
                .session
                .send_failed(echo.local_id, "no connected provider".into());
            self.publish_effects(fx);
            return;
        };
        self.sends_in_flight.insert(echo.local_id);
        let local_id = echo.local_id;
        let request = SendRequest {
            phone: echo.phone,
            content: echo.content,
            lead_id: echo.lead_id,
        };
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = provider.send_message(request).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SendCompleted {
                local_id,
                result,
            })));
        });
        // The echo is already in the timeline; publish it before the network answers.
        self.refresh_views();
    }

    /// Resolved against the echo book by local id, whatever conversation is open now.
    pub(super) fn on_send_completed(
        &mut self,
        local_id: i64,
        result: Result<SendAck, ProviderError>,
    ) {
        self.sends_in_flight.remove(&local_id);
        let fx = match result {
            Ok(ack) => {
                tracing::info!(local_id, id = ack.id, "send accepted");
                self.session.send_succeeded(local_id, ack)
            }
            Err(e) => {
                tracing::warn!(local_id, %e, "send failed");
                self.session.send_failed(local_id, e.to_string())
            }
        };
        self.publish_effects(fx);
    }
}
