//! Domain types for mailscribe.
//!
//! This module contains the core data structures:
//! - Cursor: position in the mailbox change log
//! - Message: change records, candidate messages, attachment references
//! - Notification: the push envelope and its decoded payload
//! - Events: processing journal records

pub mod cursor;
pub mod events;
pub mod message;
pub mod notification;

// Re-export commonly used types
pub use cursor::Cursor;
pub use events::{Outcome, ProcessingEvent, Stage};
pub use message::{
    AttachmentRef, CandidateMessage, ChangeKind, ChangeRecord, Header, HistoryPage, MessagePart,
};
pub use notification::{MailboxNotification, NotificationError, PushEnvelope, PushMessage};
