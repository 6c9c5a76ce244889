use std::sync::Arc;

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::reminders::ReminderStore;
use crate::scheduler::ReminderScheduler;
use crate::telegram::TelegramClient;
use crate::Result;

/// Startup recovery: re-arm every future-due persisted reminder and purge
/// the past-due ones from storage. A damaged snapshot aborts startup loudly
/// instead of being treated as an empty list. Returns the number of armed
/// timers.
pub async fn recover_reminders(
    store: &ReminderStore,
    scheduler: &ReminderScheduler,
) -> Result<usize> {
    let persisted = store.load().await?;
    let total = persisted.len();
    let past_due = scheduler.reload_from(persisted).await;
    let armed = total - past_due.len();

    for stale in &past_due {
        tracing::warn!(
            reminder_id = %stale.id,
            task = %stale.task,
            due_time = %stale.due_time,
            "purging past-due reminder at recovery"
        );
        // Removed one id at a time through the store lock so a freshly armed
        // timer firing right now cannot be resurrected by a stale snapshot.
        store.remove(&stale.id).await?;
    }

    Ok(armed)
}

/// Wires the bot together and runs it until SIGINT.
pub async fn run(config: Config, token: String, allowed_chat_id: i64) -> Result<()> {
    let store = Arc::new(ReminderStore::new(config.reminders_path())?);
    let client = Arc::new(match config.telegram.as_ref().and_then(|t| t.api_base.clone()) {
        Some(base) => TelegramClient::with_base_url(base),
        None => TelegramClient::new(&token),
    });
    let scheduler = Arc::new(ReminderScheduler::new(store.clone(), client.clone()));

    let armed = recover_reminders(&store, &scheduler).await?;
    tracing::info!(armed, "reminder recovery complete");

    let handler = CommandHandler::new(store, scheduler.clone());
    let poll_timeout = config.poll_timeout_seconds();

    tokio::select! {
        _ = client.run_polling_loop(&handler, allowed_chat_id, poll_timeout) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    scheduler.shutdown().await;
    Ok(())
}
