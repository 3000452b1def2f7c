//! Batched embedding lookups and write-back

mod common;

use common::*;
use std::time::Duration;
use tiercache_core::cache::DistributedStore;
use tiercache_core::error::{CacheError, Phase};

const MODEL: &str = "text-embedding-3-small";

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_partial_hit_embeds_only_missing_texts_in_order() {
    let harness = Harness::new();
    let cache = harness.embeddings();
    let provider = RecordingEmbedder::default();

    cache
        .get_or_embed_batch(&texts(&["alpha", "gamma", "epsilon"]), TENANT, MODEL, &provider)
        .await
        .unwrap();

    let batch = texts(&["alpha", "beta", "gamma", "delta", "epsilon"]);
    let (vectors, metrics) = cache
        .get_or_embed_batch(&batch, TENANT, MODEL, &provider)
        .await
        .unwrap();

    let batches = provider.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1], texts(&["beta", "delta"]));

    let expected: Vec<Vec<f64>> = batch.iter().map(|t| RecordingEmbedder::vector_for(t)).collect();
    assert_eq!(vectors, expected);

    assert_eq!(metrics.total, 5);
    assert_eq!(metrics.hits, 3);
    assert_eq!(metrics.misses, 2);
    assert_eq!(metrics.embedded, 2);
    assert_eq!(metrics.provider_calls, 1);
    assert!(metrics.written);
    assert!((metrics.hit_rate() - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_fully_cached_batch_skips_provider() {
    let harness = Harness::new();
    let cache = harness.embeddings();
    let provider = RecordingEmbedder::default();
    let batch = texts(&["one", "two"]);

    cache
        .get_or_embed_batch(&batch, TENANT, MODEL, &provider)
        .await
        .unwrap();
    harness.clear_local();
    let (_, metrics) = cache
        .get_or_embed_batch(&batch, TENANT, MODEL, &provider)
        .await
        .unwrap();

    assert_eq!(provider.batches().len(), 1);
    assert_eq!(metrics.provider_calls, 0);
    assert_eq!(metrics.hits, 2);
    assert!(metrics.embed.is_none());
}

#[tokio::test]
async fn test_duplicate_texts_share_one_provider_slot() {
    let harness = Harness::new();
    let cache = harness.embeddings();
    let provider = RecordingEmbedder::default();

    let (vectors, _) = cache
        .get_or_embed_batch(&texts(&["same", "other", "same"]), TENANT, MODEL, &provider)
        .await
        .unwrap();

    assert_eq!(provider.batches(), vec![texts(&["same", "other"])]);
    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors[0], vectors[2]);
}

#[tokio::test]
async fn test_models_and_tenants_do_not_share_entries() {
    let harness = Harness::new();
    let cache = harness.embeddings();
    let provider = RecordingEmbedder::default();
    let batch = texts(&["hello"]);

    cache
        .get_or_embed_batch(&batch, TENANT, MODEL, &provider)
        .await
        .unwrap();
    cache
        .get_or_embed_batch(&batch, TENANT, "other-model", &provider)
        .await
        .unwrap();
    cache
        .get_or_embed_batch(&batch, "tenant-2", MODEL, &provider)
        .await
        .unwrap();

    assert_eq!(provider.batches().len(), 3);
    assert_eq!(harness.backend.len(), 3);
}

#[tokio::test]
async fn test_entries_use_extended_lifetime() {
    let harness = Harness::new();
    let cache = harness.embeddings();
    let provider = RecordingEmbedder::default();

    cache
        .get_or_embed_batch(&texts(&["persist me"]), TENANT, MODEL, &provider)
        .await
        .unwrap();

    let key = harness
        .keys
        .embedding_key(TENANT, "embedding", MODEL, "persist me")
        .unwrap();
    let stored = harness.backend.get(&key).await.unwrap().unwrap();
    assert!(stored.ttl.unwrap() > Duration::from_secs(86_000));
}

#[tokio::test]
async fn test_provider_count_mismatch_is_an_error() {
    let harness = Harness::new();
    let cache = harness.embeddings();
    let provider = RecordingEmbedder::short_by_one();

    let err = cache
        .get_or_embed_batch(&texts(&["a", "b"]), TENANT, MODEL, &provider)
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Source { phase: Phase::Embed, .. }));
    assert!(harness.backend.is_empty());
}

#[tokio::test]
async fn test_unavailable_store_still_returns_embeddings() {
    let harness = Harness::new();
    let cache = harness.embeddings();
    let provider = RecordingEmbedder::default();
    harness.backend.set_unavailable(true);

    let batch = texts(&["x", "y"]);
    let (vectors, metrics) = cache
        .get_or_embed_batch(&batch, TENANT, MODEL, &provider)
        .await
        .unwrap();

    assert_eq!(vectors.len(), 2);
    assert_eq!(metrics.misses, 2);
    assert!(!metrics.written);
    assert!(harness.sink.count("store_degraded") >= 1);
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let harness = Harness::new();
    let cache = harness.embeddings();
    let provider = RecordingEmbedder::default();

    let (vectors, metrics) = cache
        .get_or_embed_batch(&[], TENANT, MODEL, &provider)
        .await
        .unwrap();

    assert!(vectors.is_empty());
    assert_eq!(metrics.provider_calls, 0);
    assert!(provider.batches().is_empty());
}
