//! Per-node lock table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type NodeLock = Arc<AsyncMutex<()>>;

/// address → async mutex. The outer std mutex only guards entry lookup
/// and is never held across an await.
#[derive(Debug, Default)]
pub(crate) struct NodeLocks {
    table: Mutex<HashMap<String, NodeLock>>,
}

impl NodeLocks {
    fn entry(&self, address: &str) -> NodeLock {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.entry(address.to_string()).or_default().clone()
    }

    /// Take the node's lock if nobody holds it.
    pub(crate) fn try_acquire(&self, address: &str) -> Option<OwnedMutexGuard<()>> {
        self.entry(address).try_lock_owned().ok()
    }

    /// Wait for the node's lock. Waiters are served in FIFO order.
    pub(crate) async fn acquire(&self, address: &str) -> OwnedMutexGuard<()> {
        self.entry(address).lock_owned().await
    }

    /// Drop the entry unless someone holds or waits on it.
    pub(crate) fn forget(&self, address: &str) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .get(address)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(address);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
