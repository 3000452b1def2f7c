//! Against a real Redis or Dragonfly. Run with:
//! `REDIS_URL=redis://localhost:6379 cargo test --features test-services`
#![cfg(feature = "test-services")]

mod common;

use common::RecordingEmbedder;
use serde_json::json;
use std::time::Duration;
use tiercache_core::cache::distributed::RedisStore;
use tiercache_core::cache::{
    CacheKey, CacheSource, CacheValue, DistributedStore, Expiry, InvalidationRequest, LoadOptions,
};
use tiercache_core::config::{CacheEngineConfig, RedisConfig};
use tiercache_core::engine::CacheEngine;

fn redis_config() -> RedisConfig {
    RedisConfig {
        url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        connection_timeout_ms: 2_000,
    }
}

/// Engine with its own key prefix so concurrent runs never collide
async fn redis_engine() -> CacheEngine {
    let mut config = CacheEngineConfig::for_test();
    config.key_prefix = format!("tctest{}", uuid::Uuid::new_v4().simple());
    config.l2.backend = "redis".to_string();
    config.l2.operation_timeout_ms = 1_000;
    config.l2.redis = Some(redis_config());

    let engine = CacheEngine::from_config(config).await.unwrap();
    assert_eq!(
        engine.store().distributed().provider_name(),
        "redis",
        "REDIS_URL must point at a reachable server"
    );
    engine
}

#[tokio::test]
async fn test_get_returns_remaining_ttl() {
    let store = RedisStore::from_config(&redis_config()).await.unwrap();
    let key = format!("tctest:{}:ttl", uuid::Uuid::new_v4().simple());

    store
        .set(&key, b"value", Expiry::from_secs(60))
        .await
        .unwrap();
    let stored = store.get(&key).await.unwrap().unwrap();

    assert_eq!(stored.bytes, b"value".to_vec());
    let ttl = stored.ttl.unwrap();
    assert!(ttl <= Duration::from_secs(60) && ttl > Duration::from_secs(50));
    assert_eq!(store.delete(&key).await.unwrap(), 1);
}

#[tokio::test]
async fn test_load_then_distributed_hit() {
    let engine = redis_engine().await;
    let key = CacheKey::new("t1", "agent_config", "agent-1").with_agent("agent-1");
    let fetcher = common::CountingFetcher::returning(json!({"model": "small"}));

    let first = engine
        .orchestrator()
        .get_or_load(&key, &fetcher, None, LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(first.source(), Some(CacheSource::Database));

    engine.store().local().unwrap().clear();
    let second = engine
        .orchestrator()
        .get_or_load(&key, &fetcher, None, LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(second.source(), Some(CacheSource::Distributed));
    assert_eq!(fetcher.calls(), 1);

    engine.invalidation().purge_tenant("t1").await.unwrap();
    engine.shutdown().await;
}

#[tokio::test]
async fn test_scan_based_cascade() {
    let engine = redis_engine().await;
    let value = CacheValue::from(json!({"seeded": true}));
    for key in [
        CacheKey::new("t1", "agent", "agent-1"),
        CacheKey::new("t1", "agent_config", "agent-1"),
        CacheKey::new("t1", "agent_config", "agent-1").with_agent("agent-1"),
        CacheKey::new("t1", "agent_tools", "agent-1"),
    ] {
        engine
            .orchestrator()
            .put(&key, &value, LoadOptions::default())
            .await
            .unwrap();
    }

    let counts = engine
        .invalidation()
        .invalidate(InvalidationRequest::new("agent", "t1", "agent-1").with_cascade())
        .await
        .unwrap();

    assert_eq!(counts.get("agent"), Some(1));
    assert_eq!(counts.get("agent_config"), Some(2));
    assert_eq!(counts.get("agent_tools"), Some(1));
    assert_eq!(counts.total, 4);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_embedding_batch_uses_one_round_trip_each_way() {
    let engine = redis_engine().await;
    let provider = RecordingEmbedder::default();
    let texts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

    engine
        .embeddings()
        .get_or_embed_batch(&texts, "t1", "m", &provider)
        .await
        .unwrap();
    engine.store().local().unwrap().clear();
    let (vectors, metrics) = engine
        .embeddings()
        .get_or_embed_batch(&texts, "t1", "m", &provider)
        .await
        .unwrap();

    assert_eq!(provider.batches().len(), 1);
    assert_eq!(metrics.hits, 3);
    assert_eq!(vectors[1], RecordingEmbedder::vector_for("b"));

    engine.invalidation().purge_tenant("t1").await.unwrap();
    engine.shutdown().await;
}
