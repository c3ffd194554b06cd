//! Core reconciliation pipeline.
//!
//! This module contains:
//! - Checkpoint: durable, monotonic cursor storage
//! - Dedup: process-local guard against double processing
//! - Reconciler: paged change-log walk with per-page persistence
//! - Extractor: sender filter and attachment materialization
//! - Orchestrator: transcription, reply, cleanup and mark-read
//! - Context: pass coordination for entry points

pub mod checkpoint;
pub mod context;
pub mod dedup;
pub mod extractor;
pub mod journal;
pub mod limits;
pub mod orchestrator;
pub mod reconciler;
pub mod reply;

// Re-export commonly used types
pub use checkpoint::{
    CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, SaveOutcome,
};
pub use context::{Collaborators, Dispatch, PassError, ServiceContext, ServiceSettings};
pub use dedup::DedupTracker;
pub use extractor::{ExtractError, Extraction, MessageExtractor, SkipReason};
pub use journal::Journal;
pub use limits::{LimitViolation, ProcessingLimits};
pub use orchestrator::{ProcessError, TranscriptionOrchestrator};
pub use reconciler::{HistoryReconciler, HistoryWalk, PassReport, ReconcileError};
pub use reply::{caller_id, TranscriptReply};
