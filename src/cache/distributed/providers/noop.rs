//! No-op distributed store
//!
//! Always misses, always succeeds. Used when no distributed tier is
//! configured or when Redis is unreachable at startup.

use crate::cache::distributed::errors::StoreResult;
use crate::cache::distributed::traits::{DistributedStore, StoredValue};
use crate::cache::ttl::Expiry;

#[derive(Debug, Clone, Default)]
pub struct NoOpStore;

impl NoOpStore {
    pub fn new() -> Self {
        Self
    }
}

impl DistributedStore for NoOpStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<StoredValue>> {
        Ok(None)
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<StoredValue>>> {
        Ok(vec![None; keys.len()])
    }

    async fn set(&self, _key: &str, _value: &[u8], _expiry: Expiry) -> StoreResult<()> {
        Ok(())
    }

    async fn set_many(&self, _entries: &[(String, Vec<u8>)], _expiry: Expiry) -> StoreResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> StoreResult<u64> {
        Ok(0)
    }

    async fn delete_pattern(&self, _pattern: &str) -> StoreResult<u64> {
        Ok(0)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }

    fn is_distributed(&self) -> bool {
        // No state, so nothing can go stale across instances
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_always_misses() {
        let store = NoOpStore::new();
        store.set("k", b"v", Expiry::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(
            store.get_many(&["a".into(), "b".into()]).await.unwrap(),
            vec![None, None]
        );
    }

    #[tokio::test]
    async fn test_noop_deletes_report_zero() {
        let store = NoOpStore::new();
        assert_eq!(store.delete("k").await.unwrap(), 0);
        assert_eq!(store.delete_pattern("prefix:*").await.unwrap(), 0);
        assert!(store.health_check().await.unwrap());
        assert_eq!(store.provider_name(), "noop");
    }
}
