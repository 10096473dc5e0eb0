use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Async locks keyed by entity id, so writes to one task run in issue order
/// while writes to different tasks proceed concurrently.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Slot>>,
}

/// One lock plus the number of guards (holding or waiting) that refer to it.
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    users: usize,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock of `key`. Waiters are served in FIFO order.
    ///
    /// Dropping the returned future before it resolves still releases the
    /// waiter's claim on the key.
    pub async fn acquire(&self, key: &str) -> KeyedGuard<'_> {
        let lock = {
            let mut map = self.inner.lock().expect("locks poisoned");
            let slot = map.entry(key.to_string()).or_insert_with(|| Slot {
                lock: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            slot.users += 1;
            Arc::clone(&slot.lock)
        };
        let mut guard = KeyedGuard {
            owner: self,
            key: key.to_string(),
            held: None,
        };
        guard.held = Some(lock.lock_owned().await);
        guard
    }

    /// Number of keys currently tracked (held or waited on).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("locks poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &str) {
        let mut map = self.inner.lock().expect("locks poisoned");
        if let Some(slot) = map.get_mut(key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                map.remove(key);
            }
        }
    }
}

/// Claim on one key. Holds the lock once `acquire` resolves; a claim dropped
/// while still waiting only gives up its place in the queue.
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        self.owner.release(&self.key);
    }
}
