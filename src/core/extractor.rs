//! Sender filtering and attachment extraction.
//!
//! A candidate message is relevant only when its `From` address matches the
//! single allow-listed sender. Every attachment on a relevant message is
//! fetched, decoded from base64url and written to the download directory.
//! Attachments are independent: one failing does not stop the others.

use std::path::PathBuf;
use std::sync::Arc;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use mailparse::MailAddr;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::adapters::{Mailbox, MailboxError};
use crate::domain::AttachmentRef;

use super::limits::{LimitViolation, ProcessingLimits};

/// The mailbox pads attachment data inconsistently
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Per-message or per-attachment extraction errors
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to fetch from mailbox: {0}")]
    Fetch(#[from] MailboxError),

    #[error("Failed to decode attachment: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to write attachment to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    TooLarge(#[from] LimitViolation),
}

/// Why a message was deliberately not processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingSender,
    MalformedSender(String),
    SenderNotAllowed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSender => write!(f, "no From header"),
            Self::MalformedSender(raw) => write!(f, "unparseable From header: {}", raw),
            Self::SenderNotAllowed(addr) => write!(f, "sender not allowed: {}", addr),
        }
    }
}

/// One attachment's extraction result
#[derive(Debug)]
pub struct ExtractedAttachment {
    pub filename: String,
    pub result: Result<PathBuf, ExtractError>,
}

/// Result of examining one candidate message
#[derive(Debug)]
pub enum Extraction {
    Skipped(SkipReason),
    Accepted {
        subject: String,
        attachments: Vec<ExtractedAttachment>,
    },
}

pub struct MessageExtractor {
    mailbox: Arc<dyn Mailbox>,
    allowed_sender: String,
    download_dir: PathBuf,
    limits: ProcessingLimits,
}

impl MessageExtractor {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        allowed_sender: impl Into<String>,
        download_dir: impl Into<PathBuf>,
        limits: ProcessingLimits,
    ) -> Self {
        Self {
            mailbox,
            allowed_sender: allowed_sender.into(),
            download_dir: download_dir.into(),
            limits,
        }
    }

    /// Fetch a message, filter on sender and materialize its attachments.
    ///
    /// Only the message fetch itself is an `Err`; attachment failures are
    /// reported per attachment inside `Extraction::Accepted`.
    #[instrument(skip(self))]
    pub async fn extract(&self, message_id: &str) -> Result<Extraction, ExtractError> {
        let message = self.mailbox.get_message(message_id).await?;

        let Some(from) = message.header("From") else {
            warn!(message_id, "Message has no From header, skipping");
            return Ok(Extraction::Skipped(SkipReason::MissingSender));
        };

        let sender = match parse_sender(from) {
            Some(addr) => addr,
            None => {
                warn!(message_id, from, "Failed to parse From header, skipping");
                return Ok(Extraction::Skipped(SkipReason::MalformedSender(
                    from.to_string(),
                )));
            }
        };

        if !sender.eq_ignore_ascii_case(&self.allowed_sender) {
            debug!(message_id, %sender, "Sender not allow-listed");
            return Ok(Extraction::Skipped(SkipReason::SenderNotAllowed(sender)));
        }

        let mut attachments = Vec::new();
        for attachment in message.attachments() {
            let result = self.materialize(message_id, &attachment).await;
            if let Err(e) = &result {
                warn!(message_id, filename = %attachment.filename, error = %e, "Attachment extraction failed");
            }
            attachments.push(ExtractedAttachment {
                filename: attachment.filename,
                result,
            });
        }

        Ok(Extraction::Accepted {
            subject: message.subject().to_string(),
            attachments,
        })
    }

    async fn materialize(
        &self,
        message_id: &str,
        attachment: &AttachmentRef,
    ) -> Result<PathBuf, ExtractError> {
        let encoded = self
            .mailbox
            .get_attachment(message_id, &attachment.attachment_id)
            .await?;

        // Reject before decoding when the encoded form is already too big
        self.limits.validate_attachment(encoded.len() / 4 * 3)?;
        let bytes = URL_SAFE_LENIENT.decode(encoded.trim_end())?;
        self.limits.validate_attachment(bytes.len())?;

        let path = self.local_path(message_id, &attachment.filename);
        let write = async {
            tokio::fs::create_dir_all(&self.download_dir).await?;
            tokio::fs::write(&path, &bytes).await
        };
        if let Err(source) = write.await {
            // A failed write can leave a truncated file behind
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove partial attachment");
                }
            }
            return Err(ExtractError::Write { path, source });
        }

        debug!(message_id, path = %path.display(), bytes = bytes.len(), "Attachment written");
        Ok(path)
    }

    /// `<download_dir>/<message_id>-<filename>`, with path components removed
    pub fn local_path(&self, message_id: &str, filename: &str) -> PathBuf {
        self.download_dir
            .join(format!("{}-{}", sanitize(message_id), sanitize(filename)))
    }
}

/// Bare address of the first mailbox in a `From` header
pub fn parse_sender(raw: &str) -> Option<String> {
    let list = mailparse::addrparse(raw).ok()?;
    list.iter()
        .find_map(|addr| match addr {
            MailAddr::Single(info) => Some(info.addr.clone()),
            MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
        })
        .filter(|addr| addr.contains('@'))
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}
