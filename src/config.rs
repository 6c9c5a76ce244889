use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::MagpieBotError;
use crate::Result;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub allowed_chat_id: Option<i64>,
    /// Override for the Bot API base URL. Tests point this at a mock server.
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemindersConfig {
    pub path: Option<String>,
    pub poll_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub telegram: Option<TelegramConfig>,
    pub reminders: Option<RemindersConfig>,
}

impl Config {
    pub fn convention_defaults() -> Self {
        Self {
            telegram: Some(TelegramConfig {
                token: None,
                allowed_chat_id: None,
                api_base: None,
            }),
            reminders: Some(RemindersConfig {
                path: Some(crate::runtime_paths::default_reminders_path()),
                poll_timeout_seconds: Some(20),
            }),
        }
    }

    /// Loads the JSON config file, falling back to convention defaults when
    /// the file does not exist. A file that exists but does not parse is a
    /// configuration error, not a silent fallback.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::convention_defaults());
        }
        let raw = fs::read_to_string(path).map_err(|e| MagpieBotError::Config(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| MagpieBotError::Config(e.to_string()))
    }

    pub fn reminders_path(&self) -> String {
        self.reminders
            .as_ref()
            .and_then(|r| r.path.clone())
            .unwrap_or_else(crate::runtime_paths::default_reminders_path)
    }

    pub fn poll_timeout_seconds(&self) -> u64 {
        self.reminders
            .as_ref()
            .and_then(|r| r.poll_timeout_seconds)
            .unwrap_or(20)
            .max(1)
    }
}
