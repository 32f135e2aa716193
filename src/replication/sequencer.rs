//! Per-aggregate serialization of replication.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one lock per aggregate identifier.
///
/// Work for the same aggregate runs one at a time; different aggregates
/// never contend. Locks are dropped once nobody holds or waits on them.
#[derive(Debug, Default)]
pub struct AggregateSequencer {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl AggregateSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `aggregate_id`.
    pub async fn lock(&self, aggregate_id: &str) -> OwnedMutexGuard<()> {
        self.lock_for(aggregate_id).lock_owned().await
    }

    fn lock_for(&self, aggregate_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(aggregate_id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(aggregate_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Number of aggregates with a live lock.
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }
}
