use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::MagpieBotError;
use crate::Result;

pub mod parse;

pub const DUE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A persisted reminder. `id` is the sole join key between the durable
/// snapshot and any in-flight timer; all fields are immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub chat_id: i64,
    pub task: String,
    #[serde(with = "due_time_format")]
    pub due_time: NaiveDateTime,
}

impl Reminder {
    pub fn new(chat_id: i64, task: impl Into<String>, due_time: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id,
            task: task.into(),
            // The wire format carries second precision only.
            due_time: due_time.with_nanosecond(0).unwrap_or(due_time),
        }
    }
}

mod due_time_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(super::DUE_TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, super::DUE_TIME_FORMAT)
            .map_err(serde::de::Error::custom)
    }
}

/// Durable snapshot of all reminders, one JSON file.
///
/// Every read-modify-write sequence runs under one internal mutex so a user
/// append can never interleave with a timer-fire remove. Saves land in a
/// sibling temp file first and are renamed into place, so a crash mid-write
/// never truncates the snapshot.
pub struct ReminderStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ReminderStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_parent_dir(&path)?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Reads the full snapshot. A missing file is the empty first-run case,
    /// not an error; an unreadable or corrupt file fails loudly so a damaged
    /// snapshot is never mistaken for a successful wipe.
    pub async fn load(&self) -> Result<Vec<Reminder>> {
        let _guard = self.lock.lock().await;
        self.read_snapshot().await
    }

    /// Atomically overwrites the full snapshot.
    pub async fn save(&self, all: &[Reminder]) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write_snapshot(all).await
    }

    pub async fn append(&self, reminder: Reminder) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_snapshot().await?;
        all.push(reminder);
        self.write_snapshot(&all).await
    }

    /// Removes one reminder by id. Idempotent: an unknown id is a no-op and
    /// skips the rewrite entirely.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_snapshot().await?;
        let before = all.len();
        all.retain(|r| r.id != id);
        if all.len() == before {
            return Ok(());
        }
        self.write_snapshot(&all).await
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write_snapshot(&[]).await
    }

    async fn read_snapshot(&self) -> Result<Vec<Reminder>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                MagpieBotError::Persistence(format!(
                    "reminder snapshot {} is damaged: {e}",
                    self.path.display()
                ))
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(MagpieBotError::Persistence(err.to_string())),
        }
    }

    async fn write_snapshot(&self, all: &[Reminder]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(all)
            .map_err(|e| MagpieBotError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| MagpieBotError::Persistence(e.to_string()))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| MagpieBotError::Persistence(e.to_string()))?;
        // Flushed to disk before the rename so a power loss right after a
        // successful save cannot leave an empty snapshot behind the new name.
        file.sync_all()
            .await
            .map_err(|e| MagpieBotError::Persistence(e.to_string()))?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| MagpieBotError::Persistence(e.to_string()))
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MagpieBotError::Persistence(e.to_string()))?;
        }
    }
    Ok(())
}
