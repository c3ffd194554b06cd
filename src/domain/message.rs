//! Mailbox data as seen by the pipeline: change-log pages, candidate
//! messages and their content parts.

use serde::{Deserialize, Serialize};

use super::Cursor;

/// Kind of mutation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    MessageAdded,
    MessageDeleted,
    LabelAdded,
    LabelRemoved,
}

/// One entry of a change-log page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub message_id: String,
}

impl ChangeRecord {
    pub fn message_added(message_id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::MessageAdded,
            message_id: message_id.into(),
        }
    }
}

/// A page of the remote change log.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    /// Records in log order
    pub records: Vec<ChangeRecord>,

    /// Token for the following page, if any
    pub next_page_token: Option<String>,

    /// High-water cursor reported with this page
    pub history_id: Option<Cursor>,
}

impl HistoryPage {
    /// Ids of "message added" records, in order. Other kinds are dropped.
    pub fn added_message_ids(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter(|r| r.kind == ChangeKind::MessageAdded)
            .map(|r| r.message_id.as_str())
    }

    pub fn is_last(&self) -> bool {
        self.next_page_token
            .as_deref()
            .map_or(true, |t| t.is_empty())
    }
}

/// A header name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// A content part of a message, possibly multipart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePart {
    pub part_id: String,
    pub mime_type: String,
    pub filename: String,
    pub attachment_id: Option<String>,
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// A part is an attachment only when it declares both a filename and
    /// an attachment reference.
    pub fn is_attachment(&self) -> bool {
        !self.filename.is_empty()
            && self
                .attachment_id
                .as_deref()
                .is_some_and(|id| !id.is_empty())
    }

    fn collect_attachments(&self, out: &mut Vec<AttachmentRef>) {
        if self.is_attachment() {
            out.push(AttachmentRef {
                filename: self.filename.clone(),
                attachment_id: self.attachment_id.clone().unwrap_or_default(),
                mime_type: self.mime_type.clone(),
            });
        }
        for part in &self.parts {
            part.collect_attachments(out);
        }
    }
}

/// Reference to an attachment payload held remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub filename: String,
    pub attachment_id: String,
    pub mime_type: String,
}

/// A message referenced by a "message added" change record.
#[derive(Debug, Clone, Default)]
pub struct CandidateMessage {
    pub id: String,
    pub history_id: Option<Cursor>,
    pub headers: Vec<Header>,
    pub parts: Vec<MessagePart>,
}

impl CandidateMessage {
    /// First header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn subject(&self) -> &str {
        self.header("Subject").unwrap_or_default()
    }

    /// Attachments anywhere in the part tree, in document order.
    pub fn attachments(&self) -> Vec<AttachmentRef> {
        let mut out = Vec::new();
        for part in &self.parts {
            part.collect_attachments(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(filename: &str, attachment_id: Option<&str>) -> MessagePart {
        MessagePart {
            filename: filename.to_string(),
            attachment_id: attachment_id.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_attachment_requires_filename_and_reference() {
        assert!(part("voicemail.wav", Some("att-1")).is_attachment());
        assert!(!part("", Some("att-1")).is_attachment());
        assert!(!part("voicemail.wav", None).is_attachment());
        assert!(!part("voicemail.wav", Some("")).is_attachment());
    }

    #[test]
    fn test_attachments_found_in_nested_parts() {
        let message = CandidateMessage {
            id: "m1".to_string(),
            parts: vec![
                MessagePart {
                    mime_type: "multipart/alternative".to_string(),
                    parts: vec![part("", None), part("inner.wav", Some("a2"))],
                    ..Default::default()
                },
                part("outer.wav", Some("a1")),
            ],
            ..Default::default()
        };

        let names: Vec<String> = message
            .attachments()
            .into_iter()
            .map(|a| a.filename)
            .collect();
        assert_eq!(names, vec!["inner.wav", "outer.wav"]);
    }

    #[test]
    fn test_added_ids_ignore_other_kinds() {
        let page = HistoryPage {
            records: vec![
                ChangeRecord::message_added("m1"),
                ChangeRecord {
                    kind: ChangeKind::LabelRemoved,
                    message_id: "m0".to_string(),
                },
                ChangeRecord::message_added("m2"),
            ],
            next_page_token: Some(String::new()),
            history_id: None,
        };

        assert_eq!(page.added_message_ids().collect::<Vec<_>>(), vec!["m1", "m2"]);
        assert!(page.is_last());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let message = CandidateMessage {
            headers: vec![Header {
                name: "subject".to_string(),
                value: "Missed call".to_string(),
            }],
            ..Default::default()
        };
        assert_eq!(message.subject(), "Missed call");
        assert_eq!(message.header("From"), None);
    }
}
