//! Change-log reconciliation.
//!
//! Walks the mailbox history forward from a cursor, one page at a time.
//! Each page's new messages are deduplicated and driven through extraction
//! and transcription; then the page's high-water cursor is persisted before
//! the next page is requested. Per-message failures never stop the walk or
//! the cursor advance.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{Mailbox, MailboxError};
use crate::domain::{Cursor, HistoryPage, Outcome, ProcessingEvent, Stage};

use super::checkpoint::{CheckpointError, CheckpointStore, SaveOutcome};
use super::dedup::DedupTracker;
use super::extractor::{Extraction, MessageExtractor};
use super::journal::Journal;
use super::orchestrator::TranscriptionOrchestrator;

/// Pass-level reconciliation errors
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The start cursor is older than the mailbox retains; re-seed needed
    #[error("History cursor {0} has expired")]
    CursorExpired(Cursor),

    #[error("Mailbox error during reconciliation: {0}")]
    Mailbox(#[source] MailboxError),

    #[error("Failed to persist cursor: {0}")]
    Checkpoint(#[from] CheckpointError),
}

impl From<MailboxError> for ReconcileError {
    fn from(e: MailboxError) -> Self {
        match e {
            MailboxError::CursorExpired(c) => Self::CursorExpired(c),
            other => Self::Mailbox(other),
        }
    }
}

/// What one pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Cursor the pass started from
    pub start: Cursor,
    /// Highest cursor reached (persisted unless the pass failed mid-save)
    pub cursor: Cursor,
    pub pages: usize,
    pub messages: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub transcribed: usize,
    pub failures: usize,
    /// Stopped early on shutdown
    pub cancelled: bool,
}

impl PassReport {
    pub fn new(start: Cursor) -> Self {
        Self {
            start,
            cursor: start,
            ..Default::default()
        }
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cursor {} -> {}: {} page(s), {} message(s), {} duplicate(s), {} skipped, {} transcribed, {} failed",
            self.start,
            self.cursor,
            self.pages,
            self.messages,
            self.duplicates,
            self.skipped,
            self.transcribed,
            self.failures
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Lazy, finite sequence of history pages from one start cursor
pub struct HistoryWalk<'a> {
    mailbox: &'a dyn Mailbox,
    start: Cursor,
    page_token: Option<String>,
    finished: bool,
}

impl<'a> HistoryWalk<'a> {
    pub fn new(mailbox: &'a dyn Mailbox, start: Cursor) -> Self {
        Self {
            mailbox,
            start,
            page_token: None,
            finished: false,
        }
    }

    /// Next page, or `None` once the mailbox reports no further pages
    pub async fn next_page(&mut self) -> Result<Option<HistoryPage>, MailboxError> {
        if self.finished {
            return Ok(None);
        }

        let page = self
            .mailbox
            .list_history(self.start, self.page_token.as_deref())
            .await?;

        self.finished = page.is_last();
        self.page_token = page.next_page_token.clone();
        Ok(Some(page))
    }
}

pub struct HistoryReconciler {
    mailbox: Arc<dyn Mailbox>,
    checkpoints: Arc<dyn CheckpointStore>,
    dedup: Arc<DedupTracker>,
    extractor: MessageExtractor,
    orchestrator: TranscriptionOrchestrator,
    journal: Arc<Journal>,
    shutdown: watch::Receiver<bool>,
}

impl HistoryReconciler {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        checkpoints: Arc<dyn CheckpointStore>,
        dedup: Arc<DedupTracker>,
        extractor: MessageExtractor,
        orchestrator: TranscriptionOrchestrator,
        journal: Arc<Journal>,
    ) -> Self {
        let (_tx, shutdown) = watch::channel(false);
        Self {
            mailbox,
            checkpoints,
            dedup,
            extractor,
            orchestrator,
            journal,
            shutdown,
        }
    }

    /// Stop requesting pages once `shutdown` flips to true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn dedup(&self) -> &DedupTracker {
        &self.dedup
    }

    /// Run one pass starting at `start`
    #[instrument(skip(self), fields(mailbox = %self.mailbox.identity()))]
    pub async fn reconcile(&self, start: Cursor) -> Result<PassReport, ReconcileError> {
        let mut report = PassReport::new(start);
        let mut walk = HistoryWalk::new(self.mailbox.as_ref(), start);

        loop {
            if *self.shutdown.borrow() {
                info!(cursor = %report.cursor, "Shutdown requested, stopping reconciliation");
                report.cancelled = true;
                break;
            }

            let Some(page) = walk.next_page().await? else {
                break;
            };
            report.pages += 1;
            debug!(page = report.pages, records = page.records.len(), "History page");

            for message_id in page.added_message_ids() {
                self.handle_message(message_id, &mut report).await;
            }

            if let Some(high_water) = page.history_id {
                if high_water > report.cursor {
                    self.persist(high_water, &mut report).await?;
                }
            }
        }

        if report.messages == 0 && report.pages <= 1 {
            debug!(%report, "No new messages");
        } else {
            info!(%report, "Reconciliation pass finished");
        }
        Ok(report)
    }

    async fn persist(&self, cursor: Cursor, report: &mut PassReport) -> Result<(), ReconcileError> {
        match self.checkpoints.save(cursor).await {
            Ok(outcome) => {
                if let SaveOutcome::Ignored { current, attempted } = outcome {
                    debug!(%current, %attempted, "Newer cursor already stored");
                }
                report.cursor = report.cursor.advance_to(cursor);
                self.journal
                    .record(
                        ProcessingEvent::new("", Stage::Checkpoint, Outcome::Succeeded)
                            .with_cursor(outcome.stored()),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                error!(%cursor, error = %e, "Failed to persist cursor, aborting pass");
                self.journal
                    .record(
                        ProcessingEvent::new("", Stage::Checkpoint, Outcome::Failed)
                            .with_cursor(cursor)
                            .with_detail(e.to_string()),
                    )
                    .await;
                Err(e.into())
            }
        }
    }

    async fn handle_message(&self, message_id: &str, report: &mut PassReport) {
        if !self.dedup.mark_if_new(message_id) {
            debug!(message_id, "Already handled, skipping");
            report.duplicates += 1;
            return;
        }
        report.messages += 1;

        let extraction = match self.extractor.extract(message_id).await {
            Ok(extraction) => extraction,
            Err(e) => {
                error!(message_id, error = %e, "Failed to fetch message");
                report.failures += 1;
                self.journal
                    .record(
                        ProcessingEvent::new(message_id, Stage::Filter, Outcome::Failed)
                            .with_detail(e.to_string()),
                    )
                    .await;
                return;
            }
        };

        let (subject, attachments) = match extraction {
            Extraction::Skipped(reason) => {
                report.skipped += 1;
                self.journal
                    .record(
                        ProcessingEvent::new(message_id, Stage::Filter, Outcome::Skipped)
                            .with_detail(reason.to_string()),
                    )
                    .await;
                return;
            }
            Extraction::Accepted {
                subject,
                attachments,
            } => (subject, attachments),
        };

        if attachments.is_empty() {
            debug!(message_id, "No attachments");
            report.skipped += 1;
            self.journal
                .record(
                    ProcessingEvent::new(message_id, Stage::Extract, Outcome::Skipped)
                        .with_detail("no attachments"),
                )
                .await;
            return;
        }

        for attachment in attachments {
            let path = match attachment.result {
                Ok(path) => path,
                Err(e) => {
                    report.failures += 1;
                    self.journal
                        .record(
                            ProcessingEvent::new(message_id, Stage::Extract, Outcome::Failed)
                                .with_attachment(&attachment.filename)
                                .with_detail(e.to_string()),
                        )
                        .await;
                    continue;
                }
            };

            match self.orchestrator.process(&path, &subject, message_id).await {
                Ok(()) => report.transcribed += 1,
                Err(e) => {
                    warn!(message_id, filename = %attachment.filename, error = %e, "Continuing after attachment failure");
                    report.failures += 1;
                }
            }
        }
    }
}
