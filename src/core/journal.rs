//! Append-only processing journal with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy inspection. The journal is a record for operators; nothing
//! reads it back to drive processing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::ProcessingEvent;

/// File-based journal using JSONL format
pub struct Journal {
    /// Path to the journal file (None = disabled)
    path: Option<PathBuf>,

    /// Serializes appends from concurrent passes
    write_lock: Mutex<()>,
}

impl Journal {
    /// Open a journal at `path`, creating its parent directory
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create journal directory: {}", parent.display()))?;
        }

        Ok(Self {
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    /// A journal that records nothing
    pub fn disabled() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an event to the log
    pub async fn append(&self, event: &ProcessingEvent) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize journal event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write journal event")?;
        file.flush().await.context("Failed to flush journal")?;

        Ok(())
    }

    /// Append, logging instead of failing. Journal trouble must never
    /// change the outcome of a message.
    pub async fn record(&self, event: ProcessingEvent) {
        if let Err(e) = self.append(&event).await {
            warn!(error = %e, message_id = %event.message_id, "Failed to append journal event");
        }
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<ProcessingEvent>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: ProcessingEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse journal event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Most recent `limit` events, newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<ProcessingEvent>> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().take(limit).collect())
    }

    /// All failure events, in order
    pub async fn failures(&self) -> Result<Vec<ProcessingEvent>> {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(|e| e.is_failure()).collect())
    }

    /// Events for one message, in order
    pub async fn for_message(&self, message_id: &str) -> Result<Vec<ProcessingEvent>> {
        let events = self.replay().await?;
        Ok(events
            .into_iter()
            .filter(|e| e.message_id == message_id)
            .collect())
    }
}
