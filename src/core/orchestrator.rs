//! Transcription and reply for one extracted attachment.
//!
//! Transcribes the local file under a hard timeout, mails the transcript,
//! then always deletes the local file and marks the source message read,
//! whatever happened before. Every stage is journaled.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{AudioInput, MailSender, Mailbox, MailboxError, TranscribeError, Transcriber};
use crate::domain::{Outcome, ProcessingEvent, Stage};

use super::journal::Journal;
use super::reply::TranscriptReply;

/// Per-attachment processing errors
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to read attachment: {0}")]
    Read(#[from] std::io::Error),

    #[error("Transcription timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Transcription(#[from] TranscribeError),

    #[error("Failed to send transcript: {0}")]
    Send(#[source] MailboxError),
}

impl ProcessError {
    fn stage(&self) -> Stage {
        match self {
            Self::Read(_) | Self::Timeout(_) | Self::Transcription(_) => Stage::Transcribe,
            Self::Send(_) => Stage::Reply,
        }
    }
}

/// Drives one attachment from local file to sent transcript
pub struct TranscriptionOrchestrator {
    mailbox: Arc<dyn Mailbox>,
    sender: Arc<dyn MailSender>,
    transcriber: Arc<dyn Transcriber>,
    journal: Arc<Journal>,
    recipient: String,
    content_type: String,
    timeout: Duration,
}

impl TranscriptionOrchestrator {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        sender: Arc<dyn MailSender>,
        transcriber: Arc<dyn Transcriber>,
        journal: Arc<Journal>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            mailbox,
            sender,
            transcriber,
            journal,
            recipient: recipient.into(),
            content_type: "audio/wav".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Transcribe, reply, then unconditionally clean up and mark read.
    ///
    /// The returned error reflects transcription or reply only; cleanup and
    /// mark-read problems are logged and journaled.
    #[instrument(skip(self, subject), fields(path = %path.display()))]
    pub async fn process(
        &self,
        path: &Path,
        subject: &str,
        message_id: &str,
    ) -> Result<(), ProcessError> {
        let attachment = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let started = Instant::now();

        let result = self.transcribe_and_reply(path, subject, message_id).await;

        match &result {
            Ok(()) => {
                info!(
                    message_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Transcript sent"
                );
            }
            Err(e) => {
                error!(message_id, stage = ?e.stage(), error = %e, "Attachment processing failed");
                self.journal
                    .record(
                        ProcessingEvent::new(message_id, e.stage(), Outcome::Failed)
                            .with_attachment(&attachment)
                            .with_detail(e.to_string()),
                    )
                    .await;
            }
        }

        self.cleanup(path, message_id, &attachment).await;
        self.mark_read(message_id, &attachment).await;

        result
    }

    async fn transcribe_and_reply(
        &self,
        path: &Path,
        subject: &str,
        message_id: &str,
    ) -> Result<(), ProcessError> {
        let bytes = tokio::fs::read(path).await?;
        let audio = AudioInput {
            bytes: &bytes,
            content_type: &self.content_type,
        };

        debug!(provider = self.transcriber.name(), bytes = bytes.len(), "Submitting audio");
        let transcript = tokio::time::timeout(self.timeout, self.transcriber.transcribe(audio))
            .await
            .map_err(|_| ProcessError::Timeout(self.timeout))??;

        let reply = TranscriptReply::compose(subject, &transcript);
        self.sender
            .send(&self.recipient, &reply.subject, &reply.body)
            .await
            .map_err(ProcessError::Send)?;

        self.journal
            .record(
                ProcessingEvent::new(message_id, Stage::Reply, Outcome::Succeeded)
                    .with_attachment(
                        path.file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                    ),
            )
            .await;
        Ok(())
    }

    async fn cleanup(&self, path: &Path, message_id: &str, attachment: &str) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(message_id, "Local attachment removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(message_id, error = %e, "Failed to remove local attachment");
                self.journal
                    .record(
                        ProcessingEvent::new(message_id, Stage::Cleanup, Outcome::Failed)
                            .with_attachment(attachment)
                            .with_detail(e.to_string()),
                    )
                    .await;
            }
        }
    }

    async fn mark_read(&self, message_id: &str, attachment: &str) {
        if let Err(e) = self.mailbox.mark_read(message_id).await {
            warn!(message_id, error = %e, "Failed to mark message read");
            self.journal
                .record(
                    ProcessingEvent::new(message_id, Stage::MarkRead, Outcome::Failed)
                        .with_attachment(attachment)
                        .with_detail(e.to_string()),
                )
                .await;
        }
    }
}
