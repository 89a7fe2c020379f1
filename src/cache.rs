//! Single-flight TTL cache with exact LRU-ordered tail expiration
//! (spec.md §4.5). Grounded on `aorta/cache/cache.go`'s `Fetch`/`Expire`.
//!
//! The original holds entries in a `container/list` doubly linked list plus
//! a `map[string]*list.Element`, so removal from the list is O(1) at any
//! position. Rust has no ergonomic safe equivalent without `unsafe` pointer
//! chasing or reference counting, so order is tracked with a
//! `VecDeque<(Key, Instant)>` instead: every insert/refresh pushes to the
//! front without evicting the key's previous position, leaving a stale
//! duplicate behind. The timestamp travels with each `order` entry so
//! `expire` can tell a stale duplicate apart from the key's current position
//! even when both happen to be older than the cutoff — a popped tuple whose
//! timestamp doesn't match the map's *current* entry for that key is a
//! duplicate from an earlier push and is skipped outright, never compared
//! against the cutoff or allowed to stop the scan. This preserves the
//! original's externally observable behavior (tail-first, timestamp-ordered
//! expiry) without needing an intrusive list.
//!
//! Per-key locks are never removed once created (spec.md §9's recommended
//! fix for the original's lock-eviction race — see `DESIGN.md`).

use crate::keylock::KeyLocks;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

struct Entry {
    bytes: Vec<u8>,
    timestamp: Instant,
}

pub struct Cache {
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
    order: Mutex<VecDeque<(Vec<u8>, Instant)>>,
    locks: KeyLocks,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
            locks: KeyLocks::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached bytes for `key` if fresher than `min_timestamp`,
    /// otherwise run `fill` (with the per-key lock held, coalescing
    /// concurrent fetches for the same key) and cache its result.
    pub async fn fetch<Fut, E>(
        &self,
        key: Vec<u8>,
        min_timestamp: Instant,
        fill: Fut,
    ) -> Result<Vec<u8>, E>
    where
        Fut: Future<Output = Result<Vec<u8>, E>>,
    {
        let lock = self.locks.get_or_create(&key);
        let _guard = lock.lock().await;

        // Re-check under the lock: a contending caller that arrives after a
        // sibling's fill must observe the fresh entry, not re-invoke fill.
        if let Some(entry) = self.entries.lock().unwrap().get(&key) {
            if entry.timestamp > min_timestamp {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.bytes.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let bytes = fill.await?;
        let timestamp = Instant::now();

        self.entries.lock().unwrap().insert(
            key.clone(),
            Entry {
                bytes: bytes.clone(),
                timestamp,
            },
        );
        self.order.lock().unwrap().push_front((key, timestamp));

        Ok(bytes)
    }

    /// Remove up to `max_count` (all, if 0) of the oldest entries with
    /// `timestamp <= cutoff`, scanning from the tail. Returns the number
    /// removed.
    pub fn expire(&self, max_count: usize, cutoff: Instant) -> usize {
        let mut removed = 0;

        loop {
            if max_count > 0 && removed == max_count {
                break;
            }

            let (key, stamp) = match self.order.lock().unwrap().pop_back() {
                Some(entry) => entry,
                None => break,
            };

            let mut entries = self.entries.lock().unwrap();
            match entries.get(&key) {
                Some(entry) if entry.timestamp != stamp => {
                    // This key was refreshed since this `order` tuple was
                    // pushed — it's a stale duplicate, not the key's current
                    // position. Its timestamp tells us nothing about the
                    // live entry, so it never counts toward `cutoff` and
                    // never stops the scan.
                    drop(entries);
                    continue;
                }
                Some(entry) if entry.timestamp <= cutoff => {
                    entries.remove(&key);
                    drop(entries);
                    removed += 1;
                }
                Some(_) => {
                    // Genuinely the oldest live entry, and it's fresh: stop.
                    drop(entries);
                    self.order.lock().unwrap().push_back((key, stamp));
                    break;
                }
                None => {
                    // Removed already; its order entry is a leftover.
                    continue;
                }
            }
        }

        removed
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the opaque cache key: upstream address bytes, then password bytes,
/// then every command argument's raw bytes in order (spec.md §4.5,
/// `proxy/server.go`'s `cacheKey`).
pub fn fingerprint(address: &str, password: &str, args: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(address.len() + password.len());
    buf.extend_from_slice(address.as_bytes());
    buf.extend_from_slice(password.as_bytes());
    for arg in args {
        buf.extend_from_slice(arg);
    }
    buf
}
