//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a client can start with zero
//! configuration.

use cardsync_shared::constants::{DEFAULT_APP_ID, DEFAULT_EVENT_BUFFER};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Identifier stamped on every registered entity as its owning client.
    /// Env: `CARDSYNC_APP_ID`
    /// Default: `"cardsync"`
    pub app_id: String,

    /// Whether hydrating a card model fetches an absent root-part body.
    /// Env: `CARDSYNC_FETCH_MISSING_CONTENT` (true/false)
    /// Default: `true`
    pub fetch_missing_content: bool,

    /// Whether concurrent loads for the same id collapse into one request.
    /// Env: `CARDSYNC_DEDUP_LOADS` (true/false)
    /// Default: `true`
    pub dedup_loads: bool,

    /// Capacity of the transport event channel feeding the driver.
    /// Env: `CARDSYNC_EVENT_BUFFER`
    /// Default: `256`
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            fetch_missing_content: true,
            dedup_loads: true,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(app_id) = lookup("CARDSYNC_APP_ID") {
            if !app_id.trim().is_empty() {
                config.app_id = app_id.trim().to_string();
            }
        }

        if let Some(val) = lookup("CARDSYNC_FETCH_MISSING_CONTENT") {
            config.fetch_missing_content = parse_flag(&val);
        }

        if let Some(val) = lookup("CARDSYNC_DEDUP_LOADS") {
            config.dedup_loads = parse_flag(&val);
        }

        if let Some(val) = lookup("CARDSYNC_EVENT_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.event_buffer = n,
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid CARDSYNC_EVENT_BUFFER, using default"
                    );
                }
            }
        }

        config
    }
}

fn parse_flag(val: &str) -> bool {
    let val = val.trim();
    val != "false" && val != "0"
}
