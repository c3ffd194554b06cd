//! Processing journal records.
//!
//! Every per-item outcome (skip, failure, success) is recorded as an
//! immutable event in an append-only log, so operators can see which
//! message failed at which stage and replay it by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cursor;

/// A single entry in the processing journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// Message this event concerns (empty for checkpoint events)
    pub message_id: String,

    /// Attachment filename, for per-attachment stages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,

    /// Pipeline stage that produced the event
    pub stage: Stage,

    /// What happened
    pub outcome: Outcome,

    /// Error or skip reason (NO secrets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Cursor involved, for checkpoint events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

impl ProcessingEvent {
    /// Create a new event with the current timestamp
    pub fn new(message_id: impl Into<String>, stage: Stage, outcome: Outcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            message_id: message_id.into(),
            attachment: None,
            stage,
            outcome,
            detail: None,
            cursor: None,
        }
    }

    pub fn with_attachment(mut self, attachment: impl Into<String>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

/// Pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fetching the message and checking its sender
    Filter,

    /// Fetching, decoding and writing an attachment
    Extract,

    /// Submitting audio to the transcription service
    Transcribe,

    /// Sending the transcript email
    Reply,

    /// Removing the local attachment copy
    Cleanup,

    /// Marking the source message read
    MarkRead,

    /// Persisting the change-log cursor
    Checkpoint,
}

/// Outcome of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Skipped,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_omits_empty_fields() {
        let event = ProcessingEvent::new("m1", Stage::Transcribe, Outcome::Failed)
            .with_attachment("voicemail.wav")
            .with_detail("timed out");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stage"], "transcribe");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["attachment"], "voicemail.wav");
        assert!(json.get("cursor").is_none());
        assert!(event.is_failure());
    }
}
