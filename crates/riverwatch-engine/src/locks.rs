use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-trigger mutual-exclusion registry.
///
/// Scheduler ticks and manual activation can race on the same trigger;
/// the reload → check-is-triggered → act sequence runs under this lock
/// so at most one of them observes the untriggered state.
#[derive(Default)]
pub struct TriggerLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TriggerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, trigger_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(trigger_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for a trigger that will not be touched again
    /// (triggered, soft-deleted, or archived). A holder of an
    /// already-issued guard is unaffected; late acquirers get a fresh
    /// entry and re-check state after locking.
    pub fn forget(&self, trigger_id: &str) {
        self.locks.remove(trigger_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
