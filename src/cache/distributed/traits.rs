//! Distributed store trait definition

use super::errors::StoreResult;
use crate::cache::ttl::Expiry;
use std::time::Duration;

/// A value read from the distributed tier with its remaining lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub bytes: Vec<u8>,
    /// `None` when the key has no expiry
    pub ttl: Option<Duration>,
}

impl StoredValue {
    /// Remaining lifetime as an [`Expiry`] for backfilling L1
    pub fn expiry(&self) -> Expiry {
        match self.ttl {
            Some(ttl) => Expiry::After(ttl),
            None => Expiry::Never,
        }
    }
}

/// Operations of a network key-value store with native per-key TTL
///
/// Implemented by concrete providers (Redis, in-memory, NoOp). Every
/// operation is async and bounded by the provider's operation timeout.
pub trait DistributedStore: Send + Sync {
    /// `Ok(None)` on miss
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = StoreResult<Option<StoredValue>>> + Send;

    /// One round trip for many keys; result order matches `keys`
    fn get_many(
        &self,
        keys: &[String],
    ) -> impl std::future::Future<Output = StoreResult<Vec<Option<StoredValue>>>> + Send;

    fn set(
        &self,
        key: &str,
        value: &[u8],
        expiry: Expiry,
    ) -> impl std::future::Future<Output = StoreResult<()>> + Send;

    /// Write many entries with one lifetime in one round trip
    fn set_many(
        &self,
        entries: &[(String, Vec<u8>)],
        expiry: Expiry,
    ) -> impl std::future::Future<Output = StoreResult<()>> + Send;

    /// Returns the number of keys removed (0 or 1)
    fn delete(&self, key: &str) -> impl std::future::Future<Output = StoreResult<u64>> + Send;

    /// Delete all keys matching a glob pattern without blocking the server
    fn delete_pattern(
        &self,
        pattern: &str,
    ) -> impl std::future::Future<Output = StoreResult<u64>> + Send;

    fn health_check(&self) -> impl std::future::Future<Output = StoreResult<bool>> + Send;

    fn provider_name(&self) -> &'static str;

    /// True when state is shared across instances
    fn is_distributed(&self) -> bool;
}
