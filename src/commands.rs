use std::sync::Arc;

use chrono::Local;

use crate::error::MagpieBotError;
use crate::reminders::parse::parse_duration_spec;
use crate::reminders::{Reminder, ReminderStore, DUE_TIME_FORMAT};
use crate::scheduler::ReminderScheduler;
use crate::Result;

pub const USAGE_REMIND: &str = "Use: /remind 10m buy milk (m = minutes, h = hours, d = days)";

const HELP_TEXT: &str = "Hi! I'm Magpie, your reminder assistant.\n\n\
Commands:\n\
/remind 10m buy milk - set a reminder (m = minutes, h = hours, d = days)\n\
/reminders - list active reminders\n\
/clear_reminders - wipe every reminder\n\
/exit - shut the bot down\n\
/help - this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Remind(String),
    ListActive,
    ClearAll,
    Exit,
    Help,
    Unknown(String),
}

impl Command {
    /// Splits a chat message into a command. Non-command text returns
    /// `None`; that traffic belongs to collaborators outside this repo.
    pub fn parse(text: &str) -> Option<Command> {
        let trimmed = text.trim();
        if !trimmed.starts_with('/') {
            return None;
        }
        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (trimmed, ""),
        };
        Some(match head {
            "/remind" => Command::Remind(rest.to_string()),
            "/reminders" => Command::ListActive,
            "/clear_reminders" => Command::ClearAll,
            "/exit" => Command::Exit,
            "/help" | "/start" => Command::Help,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// Turns chat commands into core calls and reply text.
pub struct CommandHandler {
    store: Arc<ReminderStore>,
    scheduler: Arc<ReminderScheduler>,
}

impl CommandHandler {
    pub fn new(store: Arc<ReminderStore>, scheduler: Arc<ReminderScheduler>) -> Self {
        Self { store, scheduler }
    }

    /// Parses a reminder spec, persists the record, and arms its timer.
    ///
    /// The timer is armed even when persistence fails: the in-memory
    /// schedule stays authoritative and the caller warns the user that the
    /// reminder may not survive a restart.
    pub async fn set(&self, spec: &str, chat_id: i64) -> Result<Reminder> {
        let parsed = parse_duration_spec(spec)?;
        let due = parsed.due_from(Local::now().naive_local())?;
        let reminder = Reminder::new(chat_id, parsed.task, due);

        let persisted = self.store.append(reminder.clone()).await;
        self.scheduler.schedule(reminder.clone()).await;
        persisted?;
        Ok(reminder)
    }

    pub async fn list_active(&self) -> Result<Vec<Reminder>> {
        self.store.load().await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.scheduler.cancel_all().await;
        self.store.clear().await
    }

    /// One chat message in, one reply out.
    pub async fn handle(&self, chat_id: i64, text: &str) -> String {
        match Command::parse(text) {
            None => {
                "I only handle reminder commands here. Send /help to see them.".to_string()
            }
            Some(Command::Help) => HELP_TEXT.to_string(),
            // The polling loop stops itself after delivering this reply.
            Some(Command::Exit) => "Shutting down...".to_string(),
            Some(Command::Unknown(cmd)) => {
                format!("Unknown command {cmd}. Send /help to see what I can do.")
            }
            Some(Command::Remind(spec)) => match self.set(&spec, chat_id).await {
                Ok(reminder) => format!(
                    "Saved! Reminder set for {}.",
                    reminder.due_time.format("%H:%M")
                ),
                Err(MagpieBotError::InvalidFormat(_)) => USAGE_REMIND.to_string(),
                Err(MagpieBotError::Persistence(err)) => {
                    tracing::warn!("reminder not persisted: {err}");
                    "Reminder armed, but it may not be saved and could be lost on restart."
                        .to_string()
                }
                Err(err) => format!("Error: {err}"),
            },
            Some(Command::ListActive) => match self.list_active().await {
                Ok(reminders) if reminders.is_empty() => "No active reminders.".to_string(),
                Ok(reminders) => {
                    let mut reply = String::from("Active reminders:");
                    for r in reminders {
                        reply.push_str(&format!(
                            "\n- {} at {}",
                            r.task,
                            r.due_time.format(DUE_TIME_FORMAT)
                        ));
                    }
                    reply
                }
                Err(err) => {
                    tracing::error!("could not list reminders: {err}");
                    "Could not read your reminders; the saved list may be damaged.".to_string()
                }
            },
            Some(Command::ClearAll) => match self.clear_all().await {
                Ok(()) => "Done! Your reminder list has been wiped clean.".to_string(),
                Err(err) => {
                    tracing::warn!("clear_reminders did not persist: {err}");
                    "Timers are cancelled, but the saved list may not be cleared.".to_string()
                }
            },
        }
    }
}
