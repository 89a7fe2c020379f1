//! The "short lock to find a per-key lock, then hold the per-key lock for
//! the work" pattern shared by the upstream pool and the cache (spec.md §9).
//!
//! The coarse `std::sync::Mutex` is only ever held long enough to read or
//! insert a `HashMap` entry; it's never held across an `.await`. The per-key
//! lock returned by `get_or_create` is what callers hold across their actual
//! (possibly async) work. `server_conn_pool.go`'s `lock`/`unlock` pair and
//! `aorta/cache/cache.go`'s `lockKey`/`unlockKey` do the same two-step dance
//! with a plain `map[string]*sync.Mutex`; `tokio::sync::Mutex` replaces
//! `sync.Mutex` here because callers hold the lock across `.await` points.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

pub struct KeyLocks {
    locks: Mutex<HashMap<Vec<u8>, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return the per-key lock for `key`, creating it if this is the first
    /// caller to ask for it.
    pub fn get_or_create(&self, key: &[u8]) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(key.to_vec())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the per-key lock entry for `key`. Callers must hold the lock
    /// being removed, per the eviction invariant in spec.md §4.4 ("the
    /// creation lock for key K may be evicted only while holding it").
    pub fn remove(&self, key: &[u8]) {
        self.locks.lock().unwrap().remove(key);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new()
    }
}
