//! Redis distributed store
//!
//! Uses `redis::aio::ConnectionManager` for async multiplexed connections
//! with automatic reconnection. Dragonfly speaks the same protocol.
//! Requires the `cache-redis` feature flag.

use crate::cache::distributed::errors::{DistributedStoreError, StoreResult};
use crate::cache::distributed::traits::{DistributedStore, StoredValue};
use crate::cache::ttl::Expiry;
use crate::config::loader::redact_url;
use crate::config::RedisConfig;
use std::time::Duration;
use tracing::debug;

/// SCAN page size for pattern deletion
const SCAN_COUNT: u64 = 200;

/// Redis-backed store using ConnectionManager.
///
/// Pattern deletion walks the keyspace with SCAN so the server is never
/// blocked by KEYS.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: redis::aio::ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    pub async fn from_config(config: &RedisConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            DistributedStoreError::Connection(format!("Failed to create Redis client: {e}"))
        })?;

        let connection_manager = tokio::time::timeout(
            config.connection_timeout(),
            redis::aio::ConnectionManager::new(client),
        )
        .await
        .map_err(|_| DistributedStoreError::Timeout {
            operation: "connect",
            timeout_ms: config.connection_timeout_ms,
        })?
        .map_err(|e| DistributedStoreError::Connection(format!("Failed to connect to Redis: {e}")))?;

        debug!(url = %redact_url(&config.url), "Redis store connected");

        Ok(Self { connection_manager })
    }
}

fn backend(command: &str, e: redis::RedisError) -> DistributedStoreError {
    DistributedStoreError::Backend(format!("Redis {command} failed: {e}"))
}

/// PTTL reply: -2 missing, -1 no expiry, otherwise milliseconds left
fn remaining_ttl(pttl_ms: i64) -> Option<Duration> {
    (pttl_ms >= 0).then(|| Duration::from_millis(pttl_ms as u64))
}

fn expiry_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl DistributedStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<StoredValue>> {
        let mut conn = self.connection_manager.clone();
        let (bytes, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("GET/PTTL", e))?;

        // Expired between the two commands
        if pttl == -2 {
            return Ok(None);
        }

        Ok(bytes.map(|bytes| StoredValue {
            bytes,
            ttl: remaining_ttl(pttl),
        }))
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<StoredValue>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection_manager.clone();
        let mut pipe = redis::pipe();
        pipe.cmd("MGET").arg(keys);
        for key in keys {
            pipe.cmd("PTTL").arg(key);
        }
        let replies: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("MGET/PTTL", e))?;

        let (values, ttls) = replies.split_first().ok_or_else(|| {
            DistributedStoreError::Backend("Redis MGET/PTTL returned no replies".to_string())
        })?;
        let values: Vec<Option<Vec<u8>>> =
            redis::from_redis_value(values).map_err(|e| backend("MGET", e))?;
        if values.len() != keys.len() || ttls.len() != keys.len() {
            return Err(DistributedStoreError::Backend(format!(
                "Redis MGET/PTTL returned {} values and {} ttls for {} keys",
                values.len(),
                ttls.len(),
                keys.len()
            )));
        }

        let mut stored = Vec::with_capacity(keys.len());
        for (bytes, ttl) in values.into_iter().zip(ttls) {
            let pttl: i64 = redis::from_redis_value(ttl).map_err(|e| backend("PTTL", e))?;
            stored.push(match bytes {
                // Expired between the two commands
                Some(_) if pttl == -2 => None,
                Some(bytes) => Some(StoredValue {
                    bytes,
                    ttl: remaining_ttl(pttl),
                }),
                None => None,
            });
        }

        debug!(requested = keys.len(), "Cache MGET");
        Ok(stored)
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> StoreResult<()> {
        let mut conn = self.connection_manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = expiry.as_duration() {
            cmd.arg("PX").arg(expiry_millis(ttl));
        }

        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend("SET", e))?;

        debug!(key = key, expiry = %expiry, "Cache SET");
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, Vec<u8>)], expiry: Expiry) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection_manager.clone();
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            let cmd = pipe.cmd("SET").arg(key).arg(value.as_slice());
            if let Some(ttl) = expiry.as_duration() {
                cmd.arg("PX").arg(expiry_millis(ttl));
            }
            cmd.ignore();
        }

        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend("SET (pipeline)", e))?;

        debug!(count = entries.len(), expiry = %expiry, "Cache SET (batch)");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection_manager.clone();
        let deleted: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("DEL", e))?;

        debug!(key = key, deleted = deleted, "Cache DEL");
        Ok(deleted)
    }

    async fn delete_pattern(&self, pattern: &str) -> StoreResult<u64> {
        let mut conn = self.connection_manager.clone();
        let mut deleted: u64 = 0;
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| backend("SCAN", e))?;

            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| backend("DEL (batch)", e))?;
                deleted += count;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = pattern, deleted = deleted, "Cache pattern DEL");
        Ok(deleted)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("PING", e))?;

        Ok(pong == "PONG")
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }

    fn is_distributed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_ttl_from_pttl() {
        assert_eq!(remaining_ttl(-1), None);
        assert_eq!(remaining_ttl(-2), None);
        assert_eq!(remaining_ttl(1500), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_expiry_millis_never_zero() {
        assert_eq!(expiry_millis(Duration::ZERO), 1);
        assert_eq!(expiry_millis(Duration::from_secs(2)), 2_000);
    }

    #[tokio::test]
    async fn test_invalid_url_is_connection_error() {
        let config = RedisConfig {
            url: "not-a-url".to_string(),
            connection_timeout_ms: 100,
        };
        assert!(matches!(
            RedisStore::from_config(&config).await,
            Err(DistributedStoreError::Connection(_))
        ));
    }

    // Integration tests require a running Redis instance (behind test-services feature)
    #[cfg(feature = "test-services")]
    mod integration {
        use super::*;
        use tracing::warn;

        fn test_redis_config() -> RedisConfig {
            RedisConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                connection_timeout_ms: 2_000,
            }
        }

        async fn connect() -> Option<RedisStore> {
            match RedisStore::from_config(&test_redis_config()).await {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!("Skipping Redis test (not available): {}", e);
                    None
                }
            }
        }

        #[tokio::test]
        async fn test_redis_crud_with_remaining_ttl() {
            let Some(store) = connect().await else { return };
            let key = format!("test:crud:{}", uuid::Uuid::new_v4());

            store.set(&key, b"{\"name\":\"Bot\"}", Expiry::from_secs(60)).await.unwrap();

            let stored = store.get(&key).await.unwrap().unwrap();
            assert_eq!(stored.bytes, b"{\"name\":\"Bot\"}");
            assert!(stored.ttl.unwrap() <= Duration::from_secs(60));

            assert_eq!(store.delete(&key).await.unwrap(), 1);
            assert_eq!(store.get(&key).await.unwrap(), None);
        }

        #[tokio::test]
        async fn test_redis_batch_and_pattern_delete() {
            let Some(store) = connect().await else { return };
            let prefix = format!("test:pattern:{}", uuid::Uuid::new_v4());
            let entries: Vec<(String, Vec<u8>)> = (0..5)
                .map(|i| (format!("{prefix}:key{i}"), vec![i as u8]))
                .collect();

            store.set_many(&entries, Expiry::from_secs(60)).await.unwrap();

            let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
            let values = store.get_many(&keys).await.unwrap();
            assert!(values.iter().all(Option::is_some));

            let deleted = store.delete_pattern(&format!("{prefix}:*")).await.unwrap();
            assert_eq!(deleted, 5);
        }

        #[tokio::test]
        async fn test_redis_health_check() {
            let Some(store) = connect().await else { return };
            assert!(store.health_check().await.unwrap());
        }
    }
}
