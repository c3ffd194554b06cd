//! Processing limits.
//!
//! Bounds the work a single message can cause:
//! - Transcription timeout (a stalled call must not stall the page)
//! - Attachment size (decoded bytes)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits applied per attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLimits {
    /// Hard timeout for one transcription call in seconds (default: 30)
    #[serde(default = "default_transcription_timeout")]
    pub transcription_timeout_seconds: u64,

    /// Maximum decoded attachment size in bytes (default: 25MB)
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

fn default_transcription_timeout() -> u64 {
    30
}
fn default_max_attachment_bytes() -> u64 {
    25 * 1024 * 1024
} // 25MB

impl Default for ProcessingLimits {
    fn default() -> Self {
        Self {
            transcription_timeout_seconds: default_transcription_timeout(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

impl ProcessingLimits {
    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription_timeout_seconds)
    }

    /// Validate a decoded attachment against the size limit
    pub fn validate_attachment(&self, size: usize) -> Result<(), LimitViolation> {
        let size = size as u64;
        if size > self.max_attachment_bytes {
            return Err(LimitViolation::AttachmentTooLarge {
                actual: size,
                limit: self.max_attachment_bytes,
            });
        }
        Ok(())
    }
}

/// Limit violation errors
#[derive(Debug, Clone, Error)]
pub enum LimitViolation {
    #[error("Attachment too large: {actual} > {limit} bytes")]
    AttachmentTooLarge { actual: u64, limit: u64 },
}
