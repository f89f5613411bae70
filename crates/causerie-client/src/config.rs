//! Engine configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the engine can start with zero
//! configuration for local development.

use std::time::Duration;

use causerie_net::ChannelConfig;
use causerie_shared::constants::{DEFAULT_HUB_URL, MUTE_COOLDOWN_SECS};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hub WebSocket endpoint.
    /// Env: `CAUSERIE_HUB_URL`
    /// Default: `ws://127.0.0.1:9200/hub`
    pub hub_url: String,

    /// Session resume token. Absent means guest mode from the start.
    /// Env: `CAUSERIE_TOKEN`
    /// Default: none.
    pub token: Option<String>,

    /// Whether inbound messages raise a desktop notification while the
    /// window is backgrounded.
    /// Env: `CAUSERIE_NOTIFICATIONS` (true/false)
    /// Default: `true`
    pub notifications_enabled: bool,

    /// Whether inbound messages play a sound while backgrounded.
    /// Env: `CAUSERIE_SOUND` (true/false)
    /// Default: `true`
    pub sound_enabled: bool,

    /// Whether inbound messages are read aloud while backgrounded.
    /// Env: `CAUSERIE_VOICE` (true/false)
    /// Default: `false`
    pub voice_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            token: None,
            notifications_enabled: true,
            sound_enabled: true,
            voice_enabled: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CAUSERIE_HUB_URL") {
            if !url.is_empty() {
                config.hub_url = url;
            }
        }

        if let Ok(token) = std::env::var("CAUSERIE_TOKEN") {
            if !token.is_empty() {
                config.token = Some(token);
            }
        }

        if let Ok(val) = std::env::var("CAUSERIE_NOTIFICATIONS") {
            config.notifications_enabled = val != "false" && val != "0";
        }

        if let Ok(val) = std::env::var("CAUSERIE_SOUND") {
            config.sound_enabled = val != "false" && val != "0";
        }

        if let Ok(val) = std::env::var("CAUSERIE_VOICE") {
            config.voice_enabled = val == "true" || val == "1";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Channel configuration derived from this engine configuration.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            url: self.hub_url.clone(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            mute_cooldown: Duration::from_secs(MUTE_COOLDOWN_SECS),
        }
    }
}
