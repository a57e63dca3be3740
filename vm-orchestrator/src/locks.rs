//! Per-key async mutual exclusion.
//!
//! At most one holder per key at a time; different keys never contend. Map
//! entries are dropped by the last guard to release, or by the next `lock`
//! call once nobody holds or waits on them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots<K> = HashMap<K, Arc<AsyncMutex<()>>>;
type LockMap<K> = Arc<Mutex<Slots<K>>>;

pub struct KeyedLocks<K> {
    inner: LockMap<K>,
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and hold it until the guard is dropped.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let slot = {
            let mut map = lock_map(&self.inner);
            // A waiter cancelled after the holder released leaves an entry
            // only the map refers to.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(map.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;

        KeyGuard {
            key,
            guard: Some(guard),
            map: Arc::clone(&self.inner),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        lock_map(&self.inner).len()
    }
}

pub struct KeyGuard<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    map: LockMap<K>,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        // Holding the map lock means nobody can clone the slot concurrently,
        // so a strong count of 1 after releasing our guard means no waiters.
        let mut map = lock_map(&self.map);
        drop(self.guard.take());
        if map
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            map.remove(&self.key);
        }
    }
}

fn lock_map<K>(map: &Mutex<Slots<K>>) -> MutexGuard<'_, Slots<K>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
