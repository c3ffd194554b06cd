//! Durable record of the last fully processed change-log cursor.
//!
//! One JSON document per mailbox identity:
//!
//! ```json
//! { "mailbox": "me@example.com", "history_id": 4242, "updated_at": "..." }
//! ```
//!
//! Writes are last-write-wins among increasing values only: a save with a
//! lower cursor than the stored one is ignored, so interleaved passes can
//! never move the checkpoint backwards.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::Cursor;

/// Errors from the checkpoint store
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// No checkpoint yet (first run)
    #[error("No checkpoint stored for mailbox: {0}")]
    NotFound(String),

    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint task failed: {0}")]
    Task(String),
}

/// Result of a save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The new cursor was written
    Written(Cursor),

    /// The stored cursor already had this value
    Unchanged(Cursor),

    /// A higher cursor is already stored; nothing written
    Ignored { current: Cursor, attempted: Cursor },
}

impl SaveOutcome {
    /// The cursor stored after the save
    pub fn stored(&self) -> Cursor {
        match *self {
            Self::Written(c) | Self::Unchanged(c) => c,
            Self::Ignored { current, .. } => current,
        }
    }
}

/// Durable cursor storage for one mailbox
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stored cursor; `NotFound` on first run
    async fn load(&self) -> Result<Cursor, CheckpointError>;

    /// Store `cursor` unless a higher one is already stored
    async fn save(&self, cursor: Cursor) -> Result<SaveOutcome, CheckpointError>;
}

/// Persisted document shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDocument {
    pub mailbox: String,
    pub history_id: Cursor,
    pub updated_at: DateTime<Utc>,
}

/// Checkpoint stored as a JSON file under `<dir>/<mailbox>.json`
pub struct FileCheckpointStore {
    mailbox: String,
    path: PathBuf,
    lock_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>, mailbox: impl Into<String>) -> Self {
        let mailbox = mailbox.into();
        let stem = file_stem(&mailbox);
        let dir = dir.as_ref();
        Self {
            path: dir.join(format!("{}.json", stem)),
            lock_path: dir.join(format!("{}.lock", stem)),
            mailbox,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored document, if any
    pub async fn document(&self) -> Result<Option<CheckpointDocument>, CheckpointError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Mailbox identity as a safe file name
fn file_stem(mailbox: &str) -> String {
    let stem: String = mailbox
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.starts_with('.') {
        format!("mailbox{}", stem)
    } else {
        stem
    }
}

fn read_document_blocking(path: &Path) -> Result<Option<CheckpointDocument>, CheckpointError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read-compare-write under an exclusive file lock, replacing atomically
fn save_blocking(
    path: &Path,
    lock_path: &Path,
    mailbox: &str,
    cursor: Cursor,
) -> Result<SaveOutcome, CheckpointError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;

    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?;
    lock.lock_exclusive()?;

    let outcome = match read_document_blocking(path)? {
        Some(doc) if doc.history_id > cursor => SaveOutcome::Ignored {
            current: doc.history_id,
            attempted: cursor,
        },
        Some(doc) if doc.history_id == cursor => SaveOutcome::Unchanged(cursor),
        _ => {
            let doc = CheckpointDocument {
                mailbox: mailbox.to_string(),
                history_id: cursor,
                updated_at: Utc::now(),
            };
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            serde_json::to_writer_pretty(&mut tmp, &doc)?;
            tmp.write_all(b"\n")?;
            tmp.as_file().sync_all()?;
            tmp.persist(path).map_err(|e| e.error)?;
            SaveOutcome::Written(cursor)
        }
    };

    lock.unlock()?;
    Ok(outcome)
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Cursor, CheckpointError> {
        self.document()
            .await?
            .map(|doc| doc.history_id)
            .ok_or_else(|| CheckpointError::NotFound(self.mailbox.clone()))
    }

    async fn save(&self, cursor: Cursor) -> Result<SaveOutcome, CheckpointError> {
        let _guard = self.write_lock.lock().await;

        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        let mailbox = self.mailbox.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            save_blocking(&path, &lock_path, &mailbox, cursor)
        })
        .await
        .map_err(|e| CheckpointError::Task(e.to_string()))??;

        debug!(?outcome, mailbox = %self.mailbox, "Checkpoint save");
        Ok(outcome)
    }
}

/// In-memory checkpoint (tests, dry runs)
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    cursor: Mutex<Option<Cursor>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(cursor: Cursor) -> Self {
        Self {
            cursor: Mutex::new(Some(cursor)),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Cursor, CheckpointError> {
        self.cursor
            .lock()
            .await
            .ok_or_else(|| CheckpointError::NotFound("memory".to_string()))
    }

    async fn save(&self, cursor: Cursor) -> Result<SaveOutcome, CheckpointError> {
        let mut stored = self.cursor.lock().await;
        let outcome = match *stored {
            Some(current) if current > cursor => SaveOutcome::Ignored {
                current,
                attempted: cursor,
            },
            Some(current) if current == cursor => SaveOutcome::Unchanged(cursor),
            _ => {
                *stored = Some(cursor);
                SaveOutcome::Written(cursor)
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_first_run_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp.path(), "me@example.com");

        assert!(matches!(store.load().await, Err(CheckpointError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp.path().join("checkpoints"), "me@example.com");

        let outcome = store.save(Cursor::new(100)).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Written(Cursor::new(100)));
        assert_eq!(store.load().await.unwrap(), Cursor::new(100));

        let doc = store.document().await.unwrap().unwrap();
        assert_eq!(doc.mailbox, "me@example.com");

        // Stored as an integer
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["history_id"], serde_json::json!(100));
    }

    #[tokio::test]
    async fn test_lower_cursor_is_ignored() {
        let temp = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp.path(), "me");

        store.save(Cursor::new(200)).await.unwrap();
        let outcome = store.save(Cursor::new(150)).await.unwrap();
        assert_eq!(
            outcome,
            SaveOutcome::Ignored {
                current: Cursor::new(200),
                attempted: Cursor::new(150)
            }
        );
        assert_eq!(store.save(Cursor::new(200)).await.unwrap(), SaveOutcome::Unchanged(Cursor::new(200)));
        assert_eq!(store.load().await.unwrap(), Cursor::new(200));
    }

    #[tokio::test]
    async fn test_concurrent_saves_keep_maximum() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileCheckpointStore::new(temp.path(), "me"));

        let handles: Vec<_> = [120u64, 400, 90, 310, 400, 5]
            .into_iter()
            .map(|v| {
                let store = store.clone();
                tokio::spawn(async move { store.save(Cursor::new(v)).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.load().await.unwrap(), Cursor::new(400));
    }

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(file_stem("me@example.com"), "me@example.com");
        assert_eq!(file_stem("../etc/passwd"), "mailbox.._etc_passwd");
        assert_eq!(file_stem(""), "mailbox");
    }
}
