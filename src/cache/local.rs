//! # Local Store (L1)
//!
//! Bounded process-local tier. Entries carry an absolute expiry checked on
//! every access; an optional background sweeper removes expired entries
//! that are never read again.
//!
//! When an insert pushes the store over capacity, a configurable fraction
//! of the capacity is evicted in one pass: expired entries first, then the
//! least recently accessed by a logical clock. Evicting a batch instead of
//! one entry keeps a full store from paying for eviction on every insert.
//!
//! `DashMap` shards keep concurrent readers and writers off a single lock.
//! Shard guards are never held across an `.await`.

use crate::cache::ttl::Expiry;
use crate::config::LocalStoreConfig;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One stored value with its lifetime bookkeeping
#[derive(Debug)]
pub struct CacheEntry {
    value: Vec<u8>,
    /// `None` = no expiry
    expires_at: Option<Instant>,
    stored_at: Instant,
    last_access: AtomicU64,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Option<Duration>, now: Instant, tick: u64) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
            stored_at: now,
            last_access: AtomicU64::new(tick),
        }
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn stored_at(&self) -> Instant {
        self.stored_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Remaining lifetime, `None` when permanent
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

#[derive(Debug, Default)]
struct LocalCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Point-in-time L1 statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocalStoreStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug)]
pub struct LocalStore {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
    eviction_fraction: f64,
    max_ttl: Duration,
    clock: AtomicU64,
    counters: LocalCounters,
}

impl LocalStore {
    pub fn new(capacity: usize, eviction_fraction: f64, max_ttl: Duration) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity.min(65_536)),
            capacity: capacity.max(1),
            eviction_fraction: eviction_fraction.clamp(f64::EPSILON, 1.0),
            max_ttl,
            clock: AtomicU64::new(0),
            counters: LocalCounters::default(),
        }
    }

    pub fn from_config(config: &LocalStoreConfig) -> Self {
        Self::new(config.capacity, config.eviction_fraction, config.max_ttl())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Read a live entry, dropping it if it has expired
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired && self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Insert or replace. The lifetime is capped at the configured L1
    /// maximum; a zero lifetime stores nothing.
    pub fn insert(&self, key: impl Into<String>, value: Vec<u8>, expiry: Expiry) {
        let ttl = expiry.capped(self.max_ttl).as_duration();
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return;
        }

        let entry = CacheEntry::new(value, ttl, Instant::now(), self.tick());
        self.entries.insert(key.into(), entry);

        if self.entries.len() > self.capacity {
            self.evict();
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry whose key matches a glob pattern
    pub fn remove_matching(&self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !glob_match(pattern, key));
        before.saturating_sub(self.entries.len())
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        self.counters
            .expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries one eviction pass removes
    pub fn eviction_batch(&self) -> usize {
        ((self.capacity as f64 * self.eviction_fraction).ceil() as usize).max(1)
    }

    fn evict(&self) {
        let target = self.eviction_batch();
        let expired = self.purge_expired();
        if expired >= target || self.entries.len() <= self.capacity.saturating_sub(target) {
            return;
        }

        let mut by_age: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.value().last_access.load(Ordering::Relaxed),
                    entry.key().clone(),
                )
            })
            .collect();
        by_age.sort_unstable_by_key(|(access, _)| *access);

        let mut evicted = 0usize;
        for (_, key) in by_age.into_iter().take(target - expired) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }

        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        debug!(
            evicted = evicted,
            expired = expired,
            remaining = self.entries.len(),
            capacity = self.capacity,
            "L1 eviction pass"
        );
    }

    pub fn stats(&self) -> LocalStoreStats {
        LocalStoreStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
        }
    }

    /// Periodically purge expired entries until `shutdown` is cancelled
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            info!(interval_ms = interval.as_millis() as u64, "L1 sweeper started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.purge_expired();
                        if removed > 0 {
                            debug!(removed = removed, "L1 sweep removed expired entries");
                        }
                    }
                }
            }
            info!("L1 sweeper stopped");
        })
    }
}

/// Redis-style glob match supporting `*`, `?` and `\` escapes
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // Position of the last `*` and the text index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((star, absorbed)) => {
                p = star + 1;
                t = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize, fraction: f64) -> LocalStore {
        LocalStore::new(capacity, fraction, Duration::from_secs(300))
    }

    #[test]
    fn test_insert_and_get() {
        let l1 = store(10, 0.1);
        l1.insert("k", b"v".to_vec(), Expiry::from_secs(60));
        assert_eq!(l1.get("k"), Some(b"v".to_vec()));
        assert_eq!(l1.get("missing"), None);

        let stats = l1.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_expired_entry_is_dropped_on_access() {
        let l1 = store(10, 0.1);
        l1.insert("k", b"v".to_vec(), Expiry::After(Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(l1.get("k"), None);
        assert!(l1.is_empty());
        assert_eq!(l1.stats().expirations, 1);
    }

    #[test]
    fn test_lifetime_capped_by_max_ttl() {
        let l1 = LocalStore::new(10, 0.1, Duration::from_millis(5));
        l1.insert("k", b"v".to_vec(), Expiry::Never);
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(l1.get("k"), None);
    }

    #[test]
    fn test_eviction_removes_fraction_of_least_recent() {
        let l1 = store(10, 0.5);
        for i in 0..10 {
            l1.insert(format!("k{i}"), vec![i as u8], Expiry::from_secs(60));
        }
        // Touch the oldest three so they survive
        for i in 0..3 {
            assert!(l1.get(&format!("k{i}")).is_some());
        }

        l1.insert("k10", vec![10], Expiry::from_secs(60));

        assert_eq!(l1.eviction_batch(), 5);
        assert_eq!(l1.len(), 6);
        for i in 0..3 {
            assert!(l1.contains(&format!("k{i}")), "k{i} was recently used");
        }
        for i in 3..8 {
            assert!(!l1.contains(&format!("k{i}")), "k{i} should be evicted");
        }
        assert!(l1.contains("k10"));
        assert_eq!(l1.stats().evictions, 5);
    }

    #[test]
    fn test_expired_entries_evicted_first() {
        let l1 = store(4, 0.25);
        l1.insert("stale", vec![0], Expiry::After(Duration::from_millis(1)));
        for i in 0..3 {
            l1.insert(format!("k{i}"), vec![i], Expiry::from_secs(60));
        }
        std::thread::sleep(Duration::from_millis(5));

        l1.insert("k3", vec![3], Expiry::from_secs(60));

        assert_eq!(l1.len(), 4);
        assert!(!l1.contains("stale"));
        assert_eq!(l1.stats().evictions, 0);
    }

    #[test]
    fn test_remove_matching() {
        let l1 = store(10, 0.1);
        l1.insert("tc:tenant:t1:type:a:res:1", vec![1], Expiry::from_secs(60));
        l1.insert("tc:tenant:t1:type:a:agent:x:res:1", vec![1], Expiry::from_secs(60));
        l1.insert("tc:tenant:t1:type:b:res:1", vec![1], Expiry::from_secs(60));

        assert_eq!(l1.remove_matching("tc:tenant:t1:type:a:*res:1"), 2);
        assert_eq!(l1.len(), 1);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("a*c", "abbbc"));
        assert!(glob_match("a*c", "ac"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a\\*c", "a*c"));
        assert!(!glob_match("a\\*c", "abc"));
        assert!(glob_match("x:*:y:*", "x:1:2:y:3"));
        assert!(!glob_match("x:*:y", "x:1:y:z"));
    }

    #[tokio::test]
    async fn test_sweeper_purges_and_stops() {
        let l1 = Arc::new(store(10, 0.1));
        l1.insert("k", vec![1], Expiry::After(Duration::from_millis(5)));

        let shutdown = CancellationToken::new();
        let handle = l1.spawn_sweeper(Duration::from_millis(10), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(l1.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
