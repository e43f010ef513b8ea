// Push channel lifecycle: subscribe, forward frames into the actor, reconnect with backoff.

use super::*;

use futures_util::StreamExt;

pub(super) struct ChannelTask {
    token: u64,
    handle: JoinHandle<()>,
}

impl ChannelTask {
    fn stop(self) {
        self.handle.abort();
    }
}

impl AppCore {
    /// Opens the session-wide channel (`scope == None`) or the channel scoped to one
    /// conversation, replacing any channel of the same kind.
    pub(super) fn open_channel(&mut self, scope: Option<String>) {
        let Some(provider) = self.provider.clone() else {
            return;
        };
        self.channel_token += 1;
        let token = self.channel_token;
        let tx = self.core_sender.clone();
        let session_id = self.config.session_id.clone();
        let config = self.config.clone();
        let task_scope = scope.clone();
        tracing::info!(token, scoped = scope.is_some(), "opening push channel");
        let handle = self.runtime.spawn(async move {
            run_channel(provider, session_id, task_scope, token, config, tx).await;
        });
        let task = ChannelTask { token, handle };
        let prev = match scope {
            None => self.channel.replace(task),
            Some(_) => self.scoped_channel.replace(task),
        };
        if let Some(prev) = prev {
            prev.stop();
        }
    }

    pub(super) fn stop_scoped_channel(&mut self) {
        if let Some(task) = self.scoped_channel.take() {
            task.stop();
        }
    }

    pub(super) fn stop_channels(&mut self) {
        if let Some(task) = self.channel.take() {
            task.stop();
        }
        self.stop_scoped_channel();
    }

    pub(super) fn is_current_channel(&self, token: u64) -> bool {
        self.channel.as_ref().is_some_and(|c| c.token == token)
            || self.scoped_channel.as_ref().is_some_and(|c| c.token == token)
    }

    pub(super) fn on_channel_opened(&mut self, token: u64, scope: Option<String>) {
        if !self.is_current_channel(token) {
            return;
        }
        if scope.is_some() {
            tracing::debug!(token, "scoped channel open");
            return;
        }
        let resumed = self.state.connection.reconnect_attempt > 0;
        self.state.connection = ConnectionState {
            connected: true,
            reconnect_attempt: 0,
            last_error: None,
        };
        if resumed {
            // Frames sent while the channel was down are gone; catch up by fetching.
            tracing::info!(token, "push channel resumed");
            self.refresh_conversations();
            self.fetch_history();
            self.refresh_views();
        } else {
            self.emit_state();
        }
    }

    pub(super) fn on_channel_dropped(
        &mut self,
        token: u64,
        scope: Option<String>,
        attempt: u32,
        error: String,
    ) {
        if !self.is_current_channel(token) {
            return;
        }
        tracing::warn!(token, attempt, scoped = scope.is_some(), %error, "push channel dropped");
        if scope.is_some() {
            return;
        }
        self.state.connection = ConnectionState {
            connected: false,
            reconnect_attempt: attempt,
            last_error: Some(error),
        };
        self.emit_state();
    }
}

async fn run_channel(
    provider: Arc<dyn MessagingProvider>,
    session_id: String,
    scope: Option<String>,
    token: u64,
    config: config::AppConfig,
    tx: Sender<CoreMsg>,
) {
    let send = |event: InternalEvent| tx.send(CoreMsg::Internal(Box::new(event))).is_ok();
    let mut failures: u32 = 0;
    loop {
        let error = match provider.subscribe(&session_id, scope.as_deref()).await {
            Ok(mut stream) => {
                failures = 0;
                if !send(InternalEvent::ChannelOpened {
                    token,
                    scope: scope.clone(),
                }) {
                    return;
                }
                let mut error = "stream ended".to_string();
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(frame) => {
                            let delivered = send(InternalEvent::FrameReceived {
                                token,
                                frame,
                                received_at: now_millis(),
                            });
                            if !delivered {
                                return;
                            }
                        }
                        Err(e) => {
                            error = e.to_string();
                            break;
                        }
                    }
                }
                error
            }
            Err(e) => e.to_string(),
        };

        let delay = config.reconnect_delay(failures);
        failures = failures.saturating_add(1);
        if !send(InternalEvent::ChannelDropped {
            token,
            scope: scope.clone(),
            attempt: failures,
            error,
        }) {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}
