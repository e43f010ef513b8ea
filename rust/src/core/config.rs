use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::session::SessionSettings;

pub(crate) const CONFIG_FILE_NAME: &str = "clinichat_config.json";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) session_id: String,
    pub(crate) self_address: Option<String>,
    pub(crate) typing_ttl_ms: u64,
    pub(crate) history_page_size: u32,
    pub(crate) echo_match_skew_ms: u64,
    // Offset used to place day-boundary markers.
    pub(crate) utc_offset_minutes: i32,
    pub(crate) reconnect_initial_delay_ms: u64,
    pub(crate) reconnect_max_delay_ms: u64,
    pub(crate) reconnect_backoff_multiplier: f64,
    // Also open a per-conversation subscription while a conversation is open.
    pub(crate) scoped_subscriptions: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_id: "default".into(),
            self_address: None,
            typing_ttl_ms: 4_500,
            history_page_size: 50,
            echo_match_skew_ms: 120_000,
            utc_offset_minutes: 0,
            reconnect_initial_delay_ms: 1_000,
            reconnect_max_delay_ms: 15_000,
            reconnect_backoff_multiplier: 1.8,
            scoped_subscriptions: false,
        }
    }
}

impl AppConfig {
    pub(crate) fn session_settings(&self) -> SessionSettings {
        let defaults = SessionSettings::default();
        SessionSettings {
            self_phone: self.self_address.clone(),
            typing_ttl_ms: self.typing_ttl_ms,
            echo_match_skew_ms: self.echo_match_skew_ms,
            history_page_size: self.history_page_size.max(1),
            utc_offset: FixedOffset::east_opt(self.utc_offset_minutes * 60)
                .unwrap_or(defaults.utc_offset),
        }
    }

    /// `min(initial * multiplier^attempt, max)`.
    pub(crate) fn reconnect_delay(&self, attempt: u32) -> Duration {
        let initial = self.reconnect_initial_delay_ms as f64;
        let max = self.reconnect_max_delay_ms as f64;
        let factor = self.reconnect_backoff_multiplier.max(1.0);
        let delay = (initial * factor.powi(attempt.min(64) as i32)).min(max);
        Duration::from_millis(delay.max(0.0) as u64)
    }
}

pub(crate) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "invalid config, using defaults");
            AppConfig::default()
        }
    }
}

pub(crate) fn default_app_config_json() -> String {
    serde_json::to_string_pretty(&AppConfig::default()).unwrap_or_else(|_| "{}".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_app_config(dir.path().to_str().unwrap());
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"typing_ttl_ms": 1000, "scoped_subscriptions": true}"#,
        )
        .unwrap();
        let cfg = load_app_config(dir.path().to_str().unwrap());
        assert_eq!(cfg.typing_ttl_ms, 1000);
        assert!(cfg.scoped_subscriptions);
        assert_eq!(cfg.history_page_size, 50);
        assert_eq!(cfg.session_id, "default");
    }

    #[test]
    fn invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{not json").unwrap();
        let cfg = load_app_config(dir.path().to_str().unwrap());
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn reconnect_delay_grows_and_caps() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.reconnect_delay(0), Duration::from_millis(1_000));
        assert_eq!(cfg.reconnect_delay(1), Duration::from_millis(1_800));
        assert_eq!(cfg.reconnect_delay(2), Duration::from_millis(3_240));
        assert_eq!(cfg.reconnect_delay(10), Duration::from_millis(15_000));
        assert_eq!(cfg.reconnect_delay(u32::MAX), Duration::from_millis(15_000));
    }

    #[test]
    fn default_json_round_trips() {
        let json = default_app_config_json();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }

    #[test]
    fn utc_offset_feeds_session_settings() {
        let cfg = AppConfig {
            utc_offset_minutes: -180,
            ..AppConfig::default()
        };
        assert_eq!(cfg.session_settings().utc_offset.local_minus_utc(), -3 * 3600);
    }
}
