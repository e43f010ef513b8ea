use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use serde_json::{json, Value};

use clinichat_core::model::{Conversation, Message};
use clinichat_core::provider::{MemoryProvider, MessagingProvider, RawFrame};
use clinichat_core::{AppAction, AppState, ChatApp, ProviderKind, TimelineItem};

#[derive(Debug, Parser)]
#[command(name = "chat_replay")]
#[command(about = "Replay captured history and push frames through the chat core")]
struct Cli {
    /// JSON array of messages, as `list_messages` returns them
    #[arg(long)]
    history: PathBuf,

    /// JSON lines: either `{"event": .., "data": ".."}` frames or bare push payloads
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Conversation to open (defaults to the phone of the first history message)
    #[arg(long)]
    phone: Option<String>,

    #[arg(long, value_enum, default_value_t = Backend::Baileys)]
    provider: Backend,

    /// Directory holding an optional clinichat_config.json
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// How long to wait for the core to go quiet after the last frame
    #[arg(long, default_value_t = 500)]
    settle_ms: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Meta,
    Baileys,
    Zapi,
}

impl From<Backend> for ProviderKind {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Meta => ProviderKind::Meta,
            Backend::Baileys => ProviderKind::Baileys,
            Backend::Zapi => ProviderKind::Zapi,
        }
    }
}

fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) -> anyhow::Result<()> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    Err(anyhow!("{what}: condition not met within {timeout:?}"))
}

fn read_frames(path: &PathBuf) -> anyhow::Result<Vec<RawFrame>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read frames {}", path.display()))?;
    let mut frames = vec![];
    for (n, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(line).with_context(|| format!("frame on line {}", n + 1))?;
        let frame = match serde_json::from_value::<RawFrame>(value.clone()) {
            Ok(frame) => frame,
            Err(_) => RawFrame {
                event: None,
                data: value.to_string(),
            },
        };
        frames.push(frame);
    }
    Ok(frames)
}

fn timeline_json(state: &AppState) -> Value {
    let Some(chat) = &state.current_chat else {
        return json!({ "phone": null, "items": [] });
    };
    let items: Vec<Value> = chat
        .items
        .iter()
        .map(|item| match item {
            TimelineItem::DayMarker { date } => json!({ "day": date }),
            TimelineItem::Message { message } => json!({
                "id": message.id,
                "direction": message.direction,
                "content": message.content,
                "status": message.status,
                "createdAt": message.created_at,
                "readAt": message.read_at,
                "local": message.is_local_echo,
                "reactions": message
                    .reactions
                    .iter()
                    .map(|r| json!({ "emoji": r.emoji, "count": r.count }))
                    .collect::<Vec<_>>(),
            }),
        })
        .collect();
    json!({
        "phone": chat.phone,
        "stale": chat.is_stale,
        "peerTyping": chat.peer_typing,
        "peerOnline": chat.peer_online,
        "items": items,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let history: Vec<Message> = serde_json::from_slice(
        &std::fs::read(&cli.history)
            .with_context(|| format!("read history {}", cli.history.display()))?,
    )
    .context("parse history")?;
    let frames = match &cli.frames {
        Some(path) => read_frames(path)?,
        None => vec![],
    };
    let phone = cli
        .phone
        .clone()
        .or_else(|| history.first().map(|m| m.phone.clone()))
        .context("no --phone given and the history is empty")?;

    let provider = MemoryProvider::new(cli.provider.into());
    provider.seed_conversation(Conversation {
        phone: phone.clone(),
        name: None,
        lead_id: None,
        last_message: history.last().map(|m| m.content.clone()),
        last_message_at: history.last().map(|m| m.created_at),
        unread_count: 0,
    });
    for m in history {
        provider.seed_message(m);
    }

    let data_dir = cli.data_dir.to_string_lossy().to_string();
    let backend: Arc<dyn MessagingProvider> = Arc::new(provider.clone());
    let app = ChatApp::with_providers(data_dir, vec![backend]);

    let timeout = Duration::from_secs(5);
    wait_until("push channel", timeout, || provider.subscriber_count() > 0)?;
    wait_until("conversation list", timeout, || {
        !app.state().chat_list.is_empty()
    })?;

    app.dispatch(AppAction::OpenConversation {
        phone: phone.clone(),
    });
    wait_until("history", timeout, || {
        let s = app.state();
        s.current_chat.is_some() && !s.busy.fetching_history
    })?;

    for frame in frames {
        let data: Value = serde_json::from_str(&frame.data).context("frame data")?;
        provider.push(frame.event.as_deref(), data);
    }

    std::thread::sleep(Duration::from_millis(cli.settle_ms));
    wait_until("settle", timeout, || {
        let s = app.state();
        !s.busy.fetching_history && !s.busy.fetching_conversations
    })?;

    let out = serde_json::to_string_pretty(&timeline_json(&app.state()))?;
    println!("{out}");
    Ok(())
}
