//! Upstream registry with per-key creation serialization and idle expiry
//! (spec.md §4.4). Grounded on `server_conn_pool.go`'s `Get`/`lock`/`unlock`,
//! generalized to use the shared [`KeyLocks`] helper instead of its own
//! inline mutex-of-mutexes map.

use crate::keylock::KeyLocks;
use crate::upstream::Upstream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub struct Pool {
    entries: Mutex<HashMap<String, Arc<Upstream>>>,
    locks: KeyLocks,
}

fn pool_key(host: &str, port: &str, password: &str) -> String {
    format!("{host}:{port}:{password}")
}

impl Pool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            locks: KeyLocks::new(),
        }
    }

    /// Return the shared upstream handle for `(host, port, password)`,
    /// creating it on first use. Two concurrent `get` calls for the same key
    /// always return the same handle.
    pub async fn get(&self, host: &str, port: &str, password: &str, timeout: Duration) -> Arc<Upstream> {
        let key = pool_key(host, port, password);
        let lock = self.locks.get_or_create(key.as_bytes());
        let _guard = lock.lock().await;

        if let Some(existing) = self.entries.lock().unwrap().get(&key) {
            return existing.clone();
        }

        let address = format!("{host}:{port}");
        let upstream = Arc::new(Upstream::new(address, password.to_string(), timeout));
        self.entries.lock().unwrap().insert(key, upstream.clone());
        upstream
    }

    /// Close and remove every upstream whose `last_used` is older than
    /// `cutoff`. Returns the number removed.
    pub async fn expire(&self, cutoff: Instant) -> usize {
        let keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        let mut expired = 0;

        for key in keys {
            let lock = self.locks.get_or_create(key.as_bytes());
            let _guard = lock.lock().await;

            let stale = self
                .entries
                .lock()
                .unwrap()
                .get(&key)
                .map(|up| up.last_used() < cutoff)
                .unwrap_or(false);

            if stale {
                let removed = self.entries.lock().unwrap().remove(&key);
                if let Some(up) = removed {
                    up.close().await;
                    expired += 1;
                }
                self.locks.remove(key.as_bytes());
            }
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_same_handle_for_same_key() {
        let pool = Pool::new();
        let a = pool.get("localhost", "6379", "pw", Duration::from_secs(1)).await;
        let b = pool.get("localhost", "6379", "pw", Duration::from_secs(1)).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn get_returns_distinct_handles_for_distinct_keys() {
        let pool = Pool::new();
        let a = pool.get("host-a", "6379", "pw", Duration::from_secs(1)).await;
        let b = pool.get("host-b", "6379", "pw", Duration::from_secs(1)).await;
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn expire_removes_only_stale_entries() {
        let pool = Pool::new();
        pool.get("fresh", "1", "", Duration::from_secs(1)).await;
        pool.get("stale", "2", "", Duration::from_secs(1)).await;

        let cutoff = Instant::now() + Duration::from_millis(50);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let removed = pool.expire(cutoff).await;
        assert_eq!(removed, 2);
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn concurrent_get_for_same_key_creates_one_handle() {
        let pool = Arc::new(Pool::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.get("shared", "6379", "pw", Duration::from_secs(1)).await
            }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        for w in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], w));
        }
    }
}
