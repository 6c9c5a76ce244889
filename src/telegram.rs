use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::commands::{Command, CommandHandler};
use crate::error::MagpieBotError;
use crate::scheduler::NotificationSink;
use crate::Result;

const ACCESS_DENIED_TEXT: &str = "Access denied. I only talk to my owner.";
const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Minimal Telegram Bot API client: `sendMessage` for deliveries and
/// `getUpdates` long polling for the command loop.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(format!("https://api.telegram.org/bot{token}"))
    }

    /// Tests point this at a mock server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/sendMessage", self.base_url))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| MagpieBotError::Notify(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MagpieBotError::Notify(e.to_string()))?;
        if !status.is_success() || !api_ok(&body) {
            return Err(MagpieBotError::Notify(format!(
                "sendMessage failed ({status}): {body}"
            )));
        }
        Ok(())
    }

    pub async fn get_updates(&self, offset: i64, timeout_seconds: u64) -> Result<Vec<Update>> {
        let response = self
            .http
            .post(format!("{}/getUpdates", self.base_url))
            .json(&json!({ "offset": offset, "timeout": timeout_seconds }))
            .timeout(Duration::from_secs(timeout_seconds.saturating_add(10)))
            .send()
            .await
            .map_err(|e| MagpieBotError::Runtime(e.to_string()))?;

        let status = response.status();
        let mut body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MagpieBotError::Runtime(e.to_string()))?;
        if !status.is_success() || !api_ok(&body) {
            return Err(MagpieBotError::Runtime(format!(
                "getUpdates failed ({status}): {body}"
            )));
        }
        serde_json::from_value(body["result"].take())
            .map_err(|e| MagpieBotError::Runtime(e.to_string()))
    }

    /// Long-polling loop: one update at a time, owner-only, replies with the
    /// dispatcher's text. Returns when the owner sends /exit; otherwise runs
    /// until the surrounding task is dropped at shutdown.
    pub async fn run_polling_loop(
        &self,
        handler: &CommandHandler,
        allowed_chat_id: i64,
        timeout_seconds: u64,
    ) {
        let mut offset = 0i64;
        loop {
            let updates = match self.get_updates(offset, timeout_seconds).await {
                Ok(updates) => updates,
                Err(err) => {
                    tracing::warn!("getUpdates failed, retrying: {err}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };
            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let Some(text) = message.text else {
                    continue;
                };
                let chat_id = message.chat.id;
                if chat_id != allowed_chat_id {
                    tracing::warn!(chat_id, "refusing message from unknown chat");
                    if let Err(err) = self.send_message(chat_id, ACCESS_DENIED_TEXT).await {
                        tracing::warn!("could not refuse unknown chat: {err}");
                    }
                    continue;
                }
                let reply = handler.handle(chat_id, &text).await;
                if let Err(err) = self.send_message(chat_id, &reply).await {
                    tracing::warn!(chat_id, "could not deliver reply: {err}");
                }
                if matches!(Command::parse(&text), Some(Command::Exit)) {
                    tracing::info!(chat_id, "exit command received, stopping polling");
                    return;
                }
            }
        }
    }
}

fn api_ok(body: &serde_json::Value) -> bool {
    body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false)
}

#[async_trait]
impl NotificationSink for TelegramClient {
    async fn notify(&self, chat_id: i64, task: &str, reminder_id: &str) -> Result<()> {
        tracing::info!(reminder_id, chat_id, "delivering reminder");
        self.send_message(chat_id, &format!("⏰ REMINDER: {task}"))
            .await
    }
}
