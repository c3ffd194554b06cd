//! Adapter interfaces for external systems.
//!
//! The pipeline talks to four collaborators through these traits: the
//! mailbox (change log, messages, attachments, read state), the outbound
//! mail path, the transcription service and the secret store. Concrete
//! implementations live in the submodules.

pub mod deepgram;
pub mod gmail;
pub mod secrets;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CandidateMessage, Cursor, HistoryPage};

pub use deepgram::{DeepgramConfig, DeepgramTranscriber};
pub use gmail::{GmailClient, GmailToken};
pub use secrets::{ChainedSecrets, DirSecrets, EnvSecrets, SecretError, SecretSource};

/// Errors from mailbox calls
#[derive(Debug, Clone, Error)]
pub enum MailboxError {
    /// The requested start cursor is older than the change log retains
    #[error("Start cursor {0} has expired from the change log")]
    CursorExpired(Cursor),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Mailbox transport error: {0}")]
    Transport(String),

    #[error("Malformed mailbox response: {0}")]
    Malformed(String),
}

/// Remote message store for a single mailbox
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Mailbox identity (used as the checkpoint key)
    fn identity(&self) -> &str;

    /// One page of "message added" change records starting at `start`
    async fn list_history(
        &self,
        start: Cursor,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, MailboxError>;

    /// Full message content
    async fn get_message(&self, message_id: &str) -> Result<CandidateMessage, MailboxError>;

    /// Attachment payload, still in its transport encoding (base64url)
    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<String, MailboxError>;

    /// Remove the unread marker from a message
    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError>;

    /// Cursor of the most recent message in the mailbox
    async fn latest_cursor(&self) -> Result<Cursor, MailboxError>;
}

/// Outbound plain-text mail
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError>;
}

/// Errors from the transcription service
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("Transcription request failed: {0}")]
    Transport(String),

    #[error("Transcription failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed transcription response: {0}")]
    Malformed(String),

    /// The service answered, but with no usable text
    #[error("Empty transcript received")]
    EmptyTranscript,
}

/// Audio request options
#[derive(Debug, Clone)]
pub struct AudioInput<'a> {
    pub bytes: &'a [u8],
    pub content_type: &'a str,
}

/// One-shot speech to text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Transcribe audio; blank results are `EmptyTranscript`
    async fn transcribe(&self, audio: AudioInput<'_>) -> Result<String, TranscribeError>;
}
