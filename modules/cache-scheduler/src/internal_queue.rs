//! Internal Queue (C3): a bounded in-memory FIFO of dispatch entries.
//! The only piece of shared mutable daemon state, guarded by a single
//! mutex, with non-suspending operations so the lock is never held
//! across an `.await` (queue-store calls, HTTP dispatch, the tick timer).

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::model::InternalEntry;

pub struct InternalQueue {
    capacity: usize,
    entries: Mutex<VecDeque<InternalEntry>>,
}

impl InternalQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `false` without blocking or spilling to the queue store
    /// when full — the caller re-inserts.
    #[must_use]
    pub fn enqueue(&self, entry: InternalEntry) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return false;
        }
        entries.push_back(entry);
        true
    }

    /// Up to `n` oldest entries, preserving the FIFO order successful
    /// `enqueue` calls established.
    #[must_use]
    pub fn dequeue(&self, n: usize) -> Vec<InternalEntry> {
        let mut entries = self.entries.lock();
        let take = n.min(entries.len());
        entries.drain(..take).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }
}
