//! Process-local guard against handling the same message twice.
//!
//! Not persisted: after a restart, redelivery protection comes from the
//! checkpoint cursor and the mailbox's read state alone.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Seen {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

/// Bounded set of message ids already handled in this process.
///
/// When full, the oldest recorded id is evicted first.
#[derive(Debug)]
pub struct DedupTracker {
    capacity: usize,
    seen: Mutex<Seen>,
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DedupTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Record `message_id`; true only the first time it is seen.
    pub fn mark_if_new(&self, message_id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if seen.ids.contains(message_id) {
            return false;
        }

        while seen.order.len() >= self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.ids.remove(&oldest);
            }
        }
        seen.ids.insert(message_id.to_string());
        seen.order.push_back(message_id.to_string());
        true
    }

    pub fn contains(&self, message_id: &str) -> bool {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.ids.contains(message_id)
    }

    pub fn len(&self) -> usize {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
