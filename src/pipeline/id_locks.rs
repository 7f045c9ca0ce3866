//! Per-id mutual exclusion.
//!
//! Ingestion, restoration and interaction handling for one notification id
//! take the id's lock, so a duplicate delivery racing a restoration or an
//! open never interleaves its read-modify-write with another writer. Distinct
//! ids never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Entries are pruned once the map grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct IdLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock guarding `id`. Callers hold the returned mutex for
    /// the duration of their critical section.
    pub fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() > PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `f` while holding the lock for `id`.
    pub fn with_lock<T>(&self, id: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
