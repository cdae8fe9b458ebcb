//! Per-call mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Registry of per-call locks. Calls with different ids never contend;
/// entries are dropped once nobody holds or waits on them.
#[derive(Clone, Default)]
pub struct CallLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CallLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `call_id`. Waiters are served in FIFO order.
    pub async fn acquire(&self, call_id: Uuid) -> CallLockGuard {
        let mutex = self
            .locks
            .entry(call_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        CallLockGuard {
            call_id,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of calls with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct CallLockGuard {
    call_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CallLockGuard {
    pub fn call_id(&self) -> Uuid {
        self.call_id
    }
}

impl Drop for CallLockGuard {
    fn drop(&mut self) {
        // Release before pruning so the map holds the only remaining Arc.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.call_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
