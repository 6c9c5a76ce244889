use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::reminders::{Reminder, ReminderStore};
use crate::Result;

/// Delivery channel invoked when a reminder fires. The scheduler logs a
/// failed delivery and proceeds with cleanup; it never retries.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, chat_id: i64, task: &str, reminder_id: &str) -> Result<()>;
}

/// One-shot timers keyed by reminder id.
///
/// Each scheduled reminder gets its own task so one blocked delivery cannot
/// stall the others. Cancellation is cooperative: a `watch` stop signal is
/// raced against the timer's sleep, and once a timer has started its fire
/// sequence it always completes notify-then-remove. `cancel_all` swaps in a
/// fresh stop channel so reminders scheduled afterwards are unaffected.
pub struct ReminderScheduler {
    store: Arc<ReminderStore>,
    sink: Arc<dyn NotificationSink>,
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    stop: Mutex<watch::Sender<bool>>,
}

impl ReminderScheduler {
    pub fn new(store: Arc<ReminderStore>, sink: Arc<dyn NotificationSink>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            store,
            sink,
            pending: Arc::new(Mutex::new(HashMap::new())),
            stop: Mutex::new(stop),
        }
    }

    /// Arms a timer for `reminder`. A due time already in the past fires
    /// immediately. The timer notifies the sink, then removes the id from
    /// the store; delivery failures are logged and removal still proceeds.
    pub async fn schedule(&self, reminder: Reminder) {
        let delay = (reminder.due_time - Local::now().naive_local())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut stop_rx = self.stop.lock().await.subscribe();
        let store = Arc::clone(&self.store);
        let sink = Arc::clone(&self.sink);
        let pending = Arc::clone(&self.pending);
        let id = reminder.id.clone();
        let task_id = id.clone();

        // Held across the spawn so an immediately-firing timer cannot try to
        // deregister itself before its handle is in the map.
        let mut pending_guard = self.pending.lock().await;
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.changed() => {
                    pending.lock().await.remove(&task_id);
                    return;
                }
            }
            // The sleep and the stop signal can land together; honor the
            // cancellation as long as the fire sequence has not begun.
            if *stop_rx.borrow() {
                pending.lock().await.remove(&task_id);
                return;
            }
            fire(&store, sink.as_ref(), &reminder).await;
            pending.lock().await.remove(&task_id);
        });

        if let Some(stale) = pending_guard.insert(id, handle) {
            stale.abort();
        }
    }

    /// Prevents every pending timer from firing and discards it. Timers
    /// already inside their fire sequence run to completion first. Persisted
    /// storage is untouched; callers pair this with `ReminderStore::clear`.
    pub async fn cancel_all(&self) {
        {
            let mut stop = self.stop.lock().await;
            let _ = stop.send(true);
            let (fresh, _) = watch::channel(false);
            *stop = fresh;
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.pending.lock().await;
            pending.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Startup-only reload. Future-due entries are armed; past-due entries
    /// are not scheduled and are handed back to the caller to purge.
    pub async fn reload_from(&self, reminders: Vec<Reminder>) -> Vec<Reminder> {
        let now = Local::now().naive_local();
        let mut past_due = Vec::new();
        for reminder in reminders {
            if reminder.due_time > now {
                self.schedule(reminder).await;
            } else {
                past_due.push(reminder);
            }
        }
        past_due
    }

    /// Drains outstanding timers so none fires against a dead channel.
    pub async fn shutdown(&self) {
        let outstanding = self.pending_count().await;
        if outstanding > 0 {
            tracing::info!(outstanding, "discarding pending reminder timers");
        }
        self.cancel_all().await;
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Fire sequence: notify, then persist the removal. The ordering trades a
/// possible duplicate notification after a crash for never silently losing
/// a reminder.
async fn fire(store: &ReminderStore, sink: &dyn NotificationSink, reminder: &Reminder) {
    if let Err(err) = sink
        .notify(reminder.chat_id, &reminder.task, &reminder.id)
        .await
    {
        tracing::warn!(
            reminder_id = %reminder.id,
            chat_id = reminder.chat_id,
            "reminder delivery failed, removing anyway: {err}"
        );
    }
    if let Err(err) = store.remove(&reminder.id).await {
        tracing::error!(
            reminder_id = %reminder.id,
            "could not remove fired reminder from storage: {err}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        calls: AtomicUsize,
        last: Mutex<Option<(i64, String, String)>>,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn notify(&self, chat_id: i64, task: &str, reminder_id: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().await = Some((chat_id, task.to_string(), reminder_id.to_string()));
            Ok(())
        }
    }

    struct FailingSink(AtomicUsize);

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn notify(&self, _chat_id: i64, _task: &str, _reminder_id: &str) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(crate::MagpieBotError::Notify("chat unreachable".to_string()))
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> Arc<ReminderStore> {
        Arc::new(ReminderStore::new(dir.path().join("reminders.json")).expect("store"))
    }

    fn due_in(ms: i64) -> chrono::NaiveDateTime {
        Local::now().naive_local() + ChronoDuration::milliseconds(ms)
    }

    #[tokio::test]
    async fn fires_once_and_removes_from_storage() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        let sink = CountingSink::new();
        let scheduler = ReminderScheduler::new(store.clone(), sink.clone());

        let reminder = Reminder::new(42, "buy milk", due_in(100));
        store.append(reminder.clone()).await.expect("append");
        scheduler.schedule(reminder.clone()).await;

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        let last = sink.last.lock().await.clone().expect("notified");
        assert_eq!(last, (42, "buy milk".to_string(), reminder.id.clone()));
        assert!(store.load().await.expect("load").is_empty());
        assert_eq!(scheduler.pending_count().await, 0);
    }

    #[tokio::test]
    async fn failed_delivery_still_removes_from_storage() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        let sink = Arc::new(FailingSink(AtomicUsize::new(0)));
        let scheduler = ReminderScheduler::new(store.clone(), sink.clone());

        let reminder = Reminder::new(42, "buy milk", due_in(100));
        store.append(reminder.clone()).await.expect("append");
        scheduler.schedule(reminder).await;

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
        assert!(store.load().await.expect("load").is_empty());
        assert_eq!(scheduler.pending_count().await, 0);
    }

    #[tokio::test]
    async fn past_due_schedule_fires_immediately() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        let sink = CountingSink::new();
        let scheduler = ReminderScheduler::new(store.clone(), sink.clone());

        scheduler
            .schedule(Reminder::new(1, "late already", due_in(-5_000)))
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_all_prevents_every_pending_fire() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        let sink = CountingSink::new();
        let scheduler = ReminderScheduler::new(store.clone(), sink.clone());

        for n in 0..3 {
            scheduler
                .schedule(Reminder::new(1, format!("task {n}"), due_in(300)))
                .await;
        }
        assert_eq!(scheduler.pending_count().await, 3);

        scheduler.cancel_all().await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_count().await, 0);
    }

    #[tokio::test]
    async fn schedule_after_cancel_all_still_fires() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        let sink = CountingSink::new();
        let scheduler = ReminderScheduler::new(store.clone(), sink.clone());

        scheduler
            .schedule(Reminder::new(1, "doomed", due_in(5_000)))
            .await;
        scheduler.cancel_all().await;

        scheduler
            .schedule(Reminder::new(1, "survivor", due_in(100)))
            .await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        let last = sink.last.lock().await.clone().expect("notified");
        assert_eq!(last.1, "survivor");
    }

    #[tokio::test]
    async fn reload_arms_future_entries_and_returns_past_due() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        let sink = CountingSink::new();
        let scheduler = ReminderScheduler::new(store.clone(), sink.clone());

        let stale = Reminder::new(42, "stale", due_in(-60_000));
        let fresh = Reminder::new(42, "fresh", due_in(300));
        let past_due = scheduler
            .reload_from(vec![stale.clone(), fresh.clone()])
            .await;

        assert_eq!(past_due, vec![stale]);
        assert_eq!(scheduler.pending_count().await, 1);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        let last = sink.last.lock().await.clone().expect("notified");
        assert_eq!(last.1, "fresh");
    }

    #[tokio::test]
    async fn ties_on_due_time_each_fire_independently() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        let sink = CountingSink::new();
        let scheduler = ReminderScheduler::new(store.clone(), sink.clone());

        let due = due_in(150);
        scheduler.schedule(Reminder::new(1, "tie a", due)).await;
        scheduler.schedule(Reminder::new(1, "tie b", due)).await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_append_during_fire_loses_nothing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        let sink = CountingSink::new();
        let scheduler = ReminderScheduler::new(store.clone(), sink.clone());

        let first = Reminder::new(1, "fires first", due_in(50));
        store.append(first.clone()).await.expect("append first");
        scheduler.schedule(first).await;

        // Appended while the first reminder is in mid-fire.
        let second = Reminder::new(1, "fires second", due_in(500));
        store.append(second.clone()).await.expect("append second");
        scheduler.schedule(second.clone()).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        let mid = store.load().await.expect("load mid");
        assert_eq!(mid, vec![second]);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert!(store.load().await.expect("load end").is_empty());
    }
}
