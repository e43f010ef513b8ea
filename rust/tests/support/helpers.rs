use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clinichat_core::model::{Conversation, Direction, Message, MessageStatus};
use clinichat_core::provider::{MemoryProvider, MessagingProvider};
use clinichat_core::{AppReconciler, AppState, AppUpdate, ChatApp, ChatMessage};
use tempfile::TempDir;

pub const ANA: &str = "5511911111111";
pub const BIA: &str = "5511922222222";

pub fn wait_until(what: &str, timeout: Duration, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, timeout, Duration::from_millis(20), f);
}

pub fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(poll);
    }
    panic!("{what}: condition not met within {timeout:?}");
}

pub fn write_config(data_dir: &str, overrides: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("clinichat_config.json");
    let mut v = serde_json::json!({
        "session_id": "test-session",
        "reconnect_initial_delay_ms": 50,
        "reconnect_max_delay_ms": 200,
    });
    if let (Some(base), Some(extra)) = (v.as_object_mut(), overrides.as_object()) {
        for (k, val) in extra {
            base.insert(k.clone(), val.clone());
        }
    }
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

pub fn message(id: i64, phone: &str, direction: Direction, content: &str, created_at: i64) -> Message {
    Message {
        id,
        phone: phone.into(),
        direction,
        content: content.into(),
        status: match direction {
            Direction::Inbound => MessageStatus::Delivered,
            Direction::Outbound => MessageStatus::Sent,
        },
        media: None,
        quoted_message_id: None,
        sender_name: None,
        created_at,
        read_at: None,
        reactions: vec![],
    }
}

pub fn conversation(phone: &str, name: &str) -> Conversation {
    Conversation {
        phone: phone.into(),
        name: Some(name.into()),
        lead_id: Some(7),
        last_message: None,
        last_message_at: None,
        unread_count: 0,
    }
}

#[derive(Clone)]
pub struct TestReconciler(pub Arc<Mutex<Vec<AppUpdate>>>);

impl TestReconciler {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn states(&self) -> Vec<AppState> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|u| match u {
                AppUpdate::FullState(s) => s.clone(),
            })
            .collect()
    }

    pub fn last_toast(&self) -> Option<String> {
        self.states().into_iter().rev().find_map(|s| s.toast)
    }
}

impl AppReconciler for TestReconciler {
    fn reconcile(&self, update: AppUpdate) {
        self.0.lock().unwrap().push(update);
    }
}

/// A running app over in-memory backends, with its data directory and update log.
pub struct Harness {
    pub dir: TempDir,
    pub app: Arc<ChatApp>,
    pub updates: TestReconciler,
}

impl Harness {
    pub fn start(providers: &[MemoryProvider], config: serde_json::Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_string_lossy().to_string();
        write_config(&data_dir, config);
        let backends: Vec<Arc<dyn MessagingProvider>> = providers
            .iter()
            .map(|p| Arc::new(p.clone()) as Arc<dyn MessagingProvider>)
            .collect();
        let app = ChatApp::with_providers(data_dir, backends);
        let updates = TestReconciler::new();
        app.listen_for_updates(Box::new(updates.clone()));
        Self { dir, app, updates }
    }

    pub fn state(&self) -> AppState {
        self.app.state()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state()
            .current_chat
            .map(|c| c.messages().cloned().collect())
            .unwrap_or_default()
    }

    pub fn wait_connected(&self) {
        wait_until("push channel connected", Duration::from_secs(2), || {
            self.state().connection.connected
        });
    }

    pub fn wait_idle(&self) {
        wait_until("core idle", Duration::from_secs(2), || {
            let busy = self.state().busy;
            !busy.fetching_conversations
                && !busy.fetching_history
                && !busy.loading_older
                && !busy.sending
        });
    }
}
