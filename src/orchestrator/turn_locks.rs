use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::identity::LookupKey;

type LockMap = HashMap<LookupKey, Weak<AsyncMutex<()>>>;

/// One async mutex per lookup key so two turns for the same thread never
/// interleave their read-modify-write. A key's entry is removed when its last
/// guard drops with nobody waiting.
#[derive(Default)]
pub struct TurnLocks {
    locks: Arc<Mutex<LockMap>>,
}

/// Held for the duration of a turn.
pub struct TurnGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: LookupKey,
    locks: Arc<Mutex<LockMap>>,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &LookupKey) -> TurnGuard {
        let guard = self.slot(key).lock_owned().await;
        TurnGuard {
            guard: Some(guard),
            key: key.clone(),
            locks: self.locks.clone(),
        }
    }

    fn slot(&self, key: &LookupKey) -> Arc<AsyncMutex<()>> {
        let mut locks = lock_map(&self.locks);

        if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    /// Keys with a live holder or waiter.
    pub fn active(&self) -> usize {
        lock_map(&self.locks)
            .values()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    /// Entries currently in the map, live or not.
    pub fn tracked(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        // Release the async mutex first so its Arc count reflects only waiters.
        drop(self.guard.take());

        let mut locks = lock_map(&self.locks);
        if locks
            .get(&self.key)
            .is_some_and(|lock| lock.strong_count() == 0)
        {
            locks.remove(&self.key);
        }
    }
}

fn lock_map(locks: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
