//! Service context: owned state shared by every entry point.
//!
//! Holds the collaborators, the reconciler (with its dedup tracker), the
//! readiness flag and the shutdown signal. Passes for the mailbox are
//! serialized here; a notification that arrives while a pass is running is
//! coalesced into a follow-up pass instead of queueing another one.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{MailSender, Mailbox, MailboxError, Transcriber};
use crate::domain::{Cursor, MailboxNotification};

use super::checkpoint::{CheckpointError, CheckpointStore};
use super::dedup::DedupTracker;
use super::extractor::MessageExtractor;
use super::journal::Journal;
use super::limits::ProcessingLimits;
use super::orchestrator::TranscriptionOrchestrator;
use super::reconciler::{HistoryReconciler, PassReport, ReconcileError};

/// Pass-level errors surfaced to entry points
#[derive(Debug, Error)]
pub enum PassError {
    #[error("Service is not ready")]
    NotReady,

    #[error("History cursor {0} has expired")]
    CursorExpired(Cursor),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl From<ReconcileError> for PassError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::CursorExpired(c) => Self::CursorExpired(c),
            ReconcileError::Mailbox(e) => Self::Mailbox(e),
            ReconcileError::Checkpoint(e) => Self::Checkpoint(e),
        }
    }
}

/// How a notification was handled
#[derive(Debug)]
pub enum Dispatch {
    /// A pass ran in this call
    Ran(PassReport),
    /// A pass was already running and will run again
    Coalesced,
    /// Addressed to a different mailbox
    Ignored,
}

/// External collaborators
pub struct Collaborators {
    pub mailbox: Arc<dyn Mailbox>,
    pub sender: Arc<dyn MailSender>,
    pub transcriber: Arc<dyn Transcriber>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub journal: Arc<Journal>,
}

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub allowed_sender: String,
    pub recipient: String,
    pub download_dir: PathBuf,
    pub audio_content_type: String,
    pub dedup_capacity: usize,
    pub limits: ProcessingLimits,
    pub reseed_on_expired: bool,
}

impl ServiceSettings {
    pub fn new(allowed_sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            allowed_sender: allowed_sender.into(),
            recipient: recipient.into(),
            download_dir: std::env::temp_dir(),
            audio_content_type: "audio/wav".to_string(),
            dedup_capacity: super::dedup::DEFAULT_CAPACITY,
            limits: ProcessingLimits::default(),
            reseed_on_expired: true,
        }
    }
}

pub struct ServiceContext {
    mailbox: Arc<dyn Mailbox>,
    checkpoints: Arc<dyn CheckpointStore>,
    journal: Arc<Journal>,
    reconciler: HistoryReconciler,
    reseed_on_expired: bool,
    ready: AtomicBool,
    pass_lock: Mutex<()>,
    pending: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl ServiceContext {
    pub fn new(collaborators: Collaborators, settings: ServiceSettings) -> Self {
        let Collaborators {
            mailbox,
            sender,
            transcriber,
            checkpoints,
            journal,
        } = collaborators;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dedup = Arc::new(DedupTracker::new(settings.dedup_capacity));
        let extractor = MessageExtractor::new(
            mailbox.clone(),
            settings.allowed_sender,
            settings.download_dir,
            settings.limits.clone(),
        );
        let orchestrator = TranscriptionOrchestrator::new(
            mailbox.clone(),
            sender,
            transcriber,
            journal.clone(),
            settings.recipient,
        )
        .with_content_type(settings.audio_content_type)
        .with_timeout(settings.limits.transcription_timeout());
        let reconciler = HistoryReconciler::new(
            mailbox.clone(),
            checkpoints.clone(),
            dedup,
            extractor,
            orchestrator,
            journal.clone(),
        )
        .with_shutdown(shutdown_rx);

        Self {
            mailbox,
            checkpoints,
            journal,
            reconciler,
            reseed_on_expired: settings.reseed_on_expired,
            ready: AtomicBool::new(false),
            pass_lock: Mutex::new(()),
            pending: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn identity(&self) -> &str {
        self.mailbox.identity()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn dedup(&self) -> &DedupTracker {
        self.reconciler.dedup()
    }

    /// Persisted cursor, if any
    pub async fn cursor(&self) -> Result<Option<Cursor>, CheckpointError> {
        match self.checkpoints.load().await {
            Ok(cursor) => Ok(Some(cursor)),
            Err(CheckpointError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Ensure a cursor exists, then accept passes
    #[instrument(skip(self), fields(mailbox = %self.identity()))]
    pub async fn initialize(&self) -> Result<Cursor, PassError> {
        let cursor = match self.checkpoints.load().await {
            Ok(cursor) => {
                info!(%cursor, "Resuming from stored cursor");
                cursor
            }
            Err(CheckpointError::NotFound(_)) => self.reseed().await?,
            Err(e) => return Err(e.into()),
        };

        self.ready.store(true, Ordering::SeqCst);
        info!("Service ready");
        Ok(cursor)
    }

    /// Store the mailbox's current tip as the cursor
    pub async fn reseed(&self) -> Result<Cursor, PassError> {
        let tip = self.mailbox.latest_cursor().await?;
        let stored = self.checkpoints.save(tip).await?.stored();
        info!(cursor = %stored, "Seeded cursor from mailbox tip");
        Ok(stored)
    }

    /// Handle a push notification
    pub async fn notify(&self, notification: &MailboxNotification) -> Result<Dispatch, PassError> {
        if !notification.is_for(self.identity()) {
            warn!(
                email_address = %notification.email_address,
                "Notification for another mailbox, ignoring"
            );
            return Ok(Dispatch::Ignored);
        }
        if !self.is_ready() {
            return Err(PassError::NotReady);
        }

        debug!(hint = %notification.history_id, "Notification received");
        self.pending.store(true, Ordering::SeqCst);

        let mut last = None;
        loop {
            let Ok(guard) = self.pass_lock.try_lock() else {
                break;
            };
            if let Some(report) = self.drain(guard).await? {
                last = Some(report);
            }
            // A notification may have landed between the drain and unlock
            if !self.pending.load(Ordering::SeqCst) {
                break;
            }
        }

        Ok(match last {
            Some(report) => Dispatch::Ran(report),
            None => {
                debug!("Pass already running, coalesced");
                Dispatch::Coalesced
            }
        })
    }

    /// Manual trigger: waits for any running pass, then runs one
    pub async fn trigger(&self) -> Result<PassReport, PassError> {
        if !self.is_ready() {
            return Err(PassError::NotReady);
        }

        let guard = self.pass_lock.lock().await;
        self.pending.store(true, Ordering::SeqCst);
        let report = self.drain(guard).await?;
        // drain runs at least once because pending was set under the lock
        Ok(report.unwrap_or_default())
    }

    /// Run passes while notifications are pending; returns the last report
    async fn drain(&self, _guard: MutexGuard<'_, ()>) -> Result<Option<PassReport>, PassError> {
        let mut last = None;
        while self.pending.swap(false, Ordering::SeqCst) {
            last = Some(self.run_pass().await?);
        }
        Ok(last)
    }

    /// One pass from the stored cursor. Caller holds the pass lock.
    async fn run_pass(&self) -> Result<PassReport, PassError> {
        let start = match self.checkpoints.load().await {
            Ok(cursor) => cursor,
            Err(CheckpointError::NotFound(_)) => self.reseed().await?,
            Err(e) => return Err(e.into()),
        };

        match self.reconciler.reconcile(start).await {
            Ok(report) => Ok(report),
            Err(ReconcileError::CursorExpired(cursor)) => {
                error!(%cursor, "Stored cursor expired");
                if self.reseed_on_expired {
                    if let Err(e) = self.reseed().await {
                        error!(error = %e, "Re-seed after cursor expiry failed");
                    }
                }
                Err(PassError::CursorExpired(cursor))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop issuing page requests; in-flight messages finish
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        info!("Shutdown signalled");
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
