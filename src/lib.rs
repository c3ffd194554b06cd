//! mailscribe - Voicemail transcription from a mailbox change feed
//!
//! Turns at-least-once mailbox push notifications into an idempotent,
//! checkpointed walk of the mailbox change log. Voicemail attachments from
//! the allow-listed sender are transcribed and the transcript is mailed to
//! a configured recipient.
//!
//! # Architecture
//!
//! - A durable cursor records how far the change log has been walked
//! - Each page of new messages is processed, then the cursor is persisted
//! - Per-message failures are logged and journaled, never blocking progress
//!
//! # Modules
//!
//! - `adapters`: External system integrations (Gmail, Deepgram, secrets)
//! - `core`: Reconciliation pipeline (checkpoint, dedup, reconciler, context)
//! - `domain`: Data structures (Cursor, messages, notifications, events)
//! - `server`: HTTP entry point
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Serve the webhook
//! mailscribe serve
//!
//! # Run a pass by hand
//! mailscribe reconcile
//!
//! # Inspect failures
//! mailscribe journal --failures
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;

// Re-export main types at crate root for convenience
pub use core::{Dispatch, PassError, PassReport, ServiceContext, ServiceSettings};
pub use domain::{Cursor, MailboxNotification};
