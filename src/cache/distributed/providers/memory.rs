//! In-process distributed store
//!
//! Honors per-key TTL and glob deletion like the network backends, so a
//! single-instance deployment (and the test suite) can run the full
//! two-tier path without Redis. Clones share state.
//!
//! [`MemoryStore::set_unavailable`] and [`MemoryStore::set_latency`]
//! simulate an outage or a slow server.

use crate::cache::distributed::errors::{DistributedStoreError, StoreResult};
use crate::cache::distributed::traits::{DistributedStore, StoredValue};
use crate::cache::local::glob_match;
use crate::cache::ttl::Expiry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }

    fn stored(self, now: Instant) -> StoredValue {
        StoredValue {
            ttl: self.expires_at.map(|at| at.saturating_duration_since(now)),
            bytes: self.bytes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
    unavailable: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a connection error until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every operation, e.g. to exercise operation timeouts
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Live entries currently stored
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries.get(key).is_some_and(|e| e.is_live(now))
    }

    async fn simulate(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DistributedStoreError::Connection(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn live(&self, key: &str, now: Instant) -> Option<MemoryEntry> {
        let entry = self.entries.get(key)?;
        if entry.is_live(now) {
            return Some(entry.clone());
        }
        drop(entry);
        self.entries.remove_if(key, |_, e| !e.is_live(now));
        None
    }

    fn put(&self, key: &str, value: &[u8], expiry: Expiry, now: Instant) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                bytes: value.to_vec(),
                expires_at: expiry.as_duration().map(|ttl| now + ttl),
            },
        );
    }
}

impl DistributedStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<StoredValue>> {
        self.simulate().await?;
        let now = Instant::now();
        Ok(self.live(key, now).map(|entry| entry.stored(now)))
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<StoredValue>>> {
        self.simulate().await?;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| self.live(key, now).map(|entry| entry.stored(now)))
            .collect())
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> StoreResult<()> {
        self.simulate().await?;
        self.put(key, value, expiry, Instant::now());
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, Vec<u8>)], expiry: Expiry) -> StoreResult<()> {
        self.simulate().await?;
        let now = Instant::now();
        for (key, value) in entries {
            self.put(key, value, expiry, now);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        self.simulate().await?;
        let now = Instant::now();
        Ok(match self.entries.remove(key) {
            Some((_, entry)) if entry.is_live(now) => 1,
            _ => 0,
        })
    }

    async fn delete_pattern(&self, pattern: &str) -> StoreResult<u64> {
        self.simulate().await?;
        let now = Instant::now();
        let mut deleted = 0u64;
        self.entries.retain(|key, entry| {
            if glob_match(pattern, key) {
                if entry.is_live(now) {
                    deleted += 1;
                }
                false
            } else {
                true
            }
        });
        debug!(pattern = pattern, deleted = deleted, "In-memory pattern DEL");
        Ok(deleted)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(self.simulate().await.is_ok())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}
