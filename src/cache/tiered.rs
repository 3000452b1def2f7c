//! # Tiered Store
//!
//! Process-local L1 in front of the distributed L2.
//!
//! - Reads go L1 then L2. An L2 hit backfills L1 with the remaining TTL.
//!   L2 read failures (error, timeout, open circuit) are served as a miss.
//! - Writes go L2 first, then L1. An L2 failure is surfaced and L1 is left
//!   without the key so it never holds a value L2 refused.
//! - Deletes purge L1 and L2; L2 failures are surfaced.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tiercache_core::cache::{
//!     CacheSource, DistributedStoreProvider, Expiry, LocalStore, MemoryStore, TieredStore,
//! };
//! use tiercache_core::metrics::NoOpMetricsSink;
//!
//! # tokio_test::block_on(async {
//! let store = TieredStore::new(
//!     Some(Arc::new(LocalStore::new(1_000, 0.1, Duration::from_secs(300)))),
//!     DistributedStoreProvider::in_memory(MemoryStore::new(), Duration::from_millis(100), None),
//!     Arc::new(NoOpMetricsSink),
//! );
//!
//! store.set("tc:k", b"v".to_vec(), Expiry::from_secs(60)).await.unwrap();
//! assert_eq!(store.get("tc:k").await, Some((b"v".to_vec(), CacheSource::Memory)));
//! # });
//! ```

use super::distributed::{DistributedStoreError, DistributedStoreProvider};
use super::local::LocalStore;
use super::ttl::Expiry;
use super::CacheSource;
use crate::error::CacheResult;
use crate::logging::log_store_failure;
use crate::metrics::{CacheEvent, MetricsSink};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TieredStore {
    l1: Option<Arc<LocalStore>>,
    l2: DistributedStoreProvider,
    metrics: Arc<dyn MetricsSink>,
}

impl TieredStore {
    /// `l1 = None` disables the process-local tier
    pub fn new(
        l1: Option<Arc<LocalStore>>,
        l2: DistributedStoreProvider,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self { l1, l2, metrics }
    }

    pub fn local(&self) -> Option<&Arc<LocalStore>> {
        self.l1.as_ref()
    }

    pub fn distributed(&self) -> &DistributedStoreProvider {
        &self.l2
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    fn degraded_read(&self, operation: &'static str, target: &str, error: DistributedStoreError) {
        match &error {
            DistributedStoreError::CircuitOpen { .. } => {
                debug!(operation = operation, key = target, "L2 circuit open, serving as miss");
            }
            _ => log_store_failure(operation, target, &error.to_string(), true),
        }
        self.metrics.record(CacheEvent::StoreDegraded {
            operation,
            error: error.to_string(),
        });
    }

    /// Returns the bytes and the tier that held them
    pub async fn get(&self, key: &str) -> Option<(Vec<u8>, CacheSource)> {
        if let Some(l1) = &self.l1 {
            if let Some(bytes) = l1.get(key) {
                debug!(key = key, "L1 hit");
                return Some((bytes, CacheSource::Memory));
            }
        }

        if !self.l2.is_enabled() {
            return None;
        }

        match self.l2.get(key).await {
            Ok(Some(stored)) => {
                debug!(key = key, "L2 hit");
                if let Some(l1) = &self.l1 {
                    l1.insert(key, stored.bytes.clone(), stored.expiry());
                }
                Some((stored.bytes, CacheSource::Distributed))
            }
            Ok(None) => None,
            Err(e) => {
                self.degraded_read("get", key, e);
                None
            }
        }
    }

    /// Batched read; result order matches `keys`. L2 hits are backfilled
    /// into L1 with their remaining L2 lifetime.
    pub async fn get_many(&self, keys: &[String]) -> Vec<Option<(Vec<u8>, CacheSource)>> {
        let mut results: Vec<Option<(Vec<u8>, CacheSource)>> = match &self.l1 {
            Some(l1) => keys
                .iter()
                .map(|key| l1.get(key).map(|bytes| (bytes, CacheSource::Memory)))
                .collect(),
            None => vec![None; keys.len()],
        };

        let missing: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, value)| value.is_none().then_some(i))
            .collect();
        if missing.is_empty() || !self.l2.is_enabled() {
            return results;
        }

        let missing_keys: Vec<String> = missing.iter().map(|&i| keys[i].clone()).collect();
        match self.l2.get_many(&missing_keys).await {
            Ok(values) => {
                for (&i, value) in missing.iter().zip(values) {
                    if let (Some(l1), Some(stored)) = (&self.l1, &value) {
                        l1.insert(keys[i].as_str(), stored.bytes.clone(), stored.expiry());
                    }
                    results[i] = value.map(|stored| (stored.bytes, CacheSource::Distributed));
                }
            }
            Err(e) => {
                let target = format!("{} keys", missing_keys.len());
                self.degraded_read("get_many", &target, e);
            }
        }

        results
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> CacheResult<()> {
        if self.l2.is_enabled() {
            if let Err(e) = self.l2.set(key, &value, expiry).await {
                if let Some(l1) = &self.l1 {
                    l1.remove(key);
                }
                log_store_failure("set", key, &e.to_string(), false);
                return Err(e.into());
            }
        }

        if let Some(l1) = &self.l1 {
            l1.insert(key, value, expiry);
        }
        debug!(key = key, expiry = %expiry, "Cache entry stored");
        Ok(())
    }

    /// Write many entries with one lifetime
    pub async fn set_many(&self, entries: Vec<(String, Vec<u8>)>, expiry: Expiry) -> CacheResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        if self.l2.is_enabled() {
            if let Err(e) = self.l2.set_many(&entries, expiry).await {
                if let Some(l1) = &self.l1 {
                    for (key, _) in &entries {
                        l1.remove(key);
                    }
                }
                let target = format!("{} keys", entries.len());
                log_store_failure("set_many", &target, &e.to_string(), false);
                return Err(e.into());
            }
        }

        if let Some(l1) = &self.l1 {
            for (key, value) in entries {
                l1.insert(key, value, expiry);
            }
        }
        Ok(())
    }

    /// Number of keys removed: the L2 count when L2 is enabled, else L1's
    pub async fn delete(&self, key: &str) -> CacheResult<u64> {
        let local = self.l1.as_ref().map_or(false, |l1| l1.remove(key));

        if !self.l2.is_enabled() {
            return Ok(u64::from(local));
        }

        self.l2.delete(key).await.map_err(|e| {
            log_store_failure("delete", key, &e.to_string(), false);
            e.into()
        })
    }

    /// Delete every key matching a glob pattern in both tiers
    pub async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let local = self
            .l1
            .as_ref()
            .map_or(0, |l1| l1.remove_matching(pattern) as u64);

        if !self.l2.is_enabled() {
            return Ok(local);
        }

        let deleted = self.l2.delete_pattern(pattern).await.map_err(|e| {
            log_store_failure("delete_pattern", pattern, &e.to_string(), false);
            e
        })?;
        debug!(pattern = pattern, l1 = local, l2 = deleted, "Pattern delete");
        Ok(deleted)
    }

    /// L2 reachability; always true when L2 is disabled
    pub async fn health_check(&self) -> bool {
        if !self.l2.is_enabled() {
            return true;
        }
        self.l2.health_check().await
    }
}
