use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per key, created on demand and dropped once nobody holds or waits for it.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    mutex: Arc<AsyncMutex<()>>,
    // Holders plus waiters
    users: usize,
}

/// Held lock on one key. Also registered while still waiting, so a cancelled
/// waiter gives its place back.
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            let entry = locks.entry(key.to_string()).or_insert_with(|| Entry {
                mutex: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            entry.users += 1;
            entry.mutex.clone()
        };

        let mut guard = KeyedGuard {
            owner: self,
            key: key.to_string(),
            guard: None,
        };
        guard.guard = Some(mutex.lock_owned().await);
        guard
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        // Release first, then forget the entry once its last user is gone
        self.guard.take();
        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = locks.get_mut(&self.key) {
            entry.users -= 1;
            if entry.users == 0 {
                locks.remove(&self.key);
            }
        }
    }
}
