//! Per-source single-flight locks
//!
//! At most one cycle per source may run at a time, otherwise two cycles
//! reading the same cursor would ingest overlapping ranges and race on the
//! cursor write. The guard releases on drop, which covers success, error,
//! timeout and task cancellation alike.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Advisory locks keyed by source id.
#[derive(Default)]
pub struct SourceLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one cycle.
pub struct SourceGuard {
    source_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl SourceGuard {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock of a source without waiting.
    ///
    /// Returns None if a cycle of that source is already running.
    pub fn try_acquire(&self, source_id: &str) -> Option<SourceGuard> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(source_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok().map(|guard| SourceGuard {
            source_id: source_id.to_string(),
            _guard: guard,
        })
    }
}
