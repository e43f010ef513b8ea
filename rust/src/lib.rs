mod actions;
mod bounded;
mod core;
pub mod echo;
pub mod events;
mod logging;
pub mod model;
pub mod phone;
pub mod presence;
pub mod provider;
pub mod reactions;
pub mod receipts;
pub mod reconcile;
pub mod session;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

use crate::provider::MessagingProvider;

pub use actions::AppAction;
pub use model::{Direction, MediaKind, MediaRef, MessageStatus};
pub use state::*;
pub use updates::*;

/// Return the default `clinichat_config.json` payload used when no config file exists.
pub fn default_config_json() -> String {
    core::default_app_config_json()
}

#[uniffi::export]
pub fn normalize_phone(input: &str) -> String {
    phone::normalize_phone(input)
}

#[uniffi::export]
pub fn to_whatsapp_address(input: &str) -> String {
    phone::to_whatsapp_address(input)
}

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct ChatApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
}

#[uniffi::export]
impl ChatApp {
    /// Handle with no backends wired in; the state reports no provider until the host
    /// builds one with [`ChatApp::with_providers`].
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        Self::with_providers(data_dir, vec![])
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}

impl ChatApp {
    /// Starts the actor over the given backends. The connected one of highest priority is
    /// used.
    pub fn with_providers(
        data_dir: String,
        providers: Vec<Arc<dyn MessagingProvider>>,
    ) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(data_dir = %data_dir, providers = providers.len(), "ChatApp starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                providers,
            );
            core.start();
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }
}
