//! # Batch Embedding Cache
//!
//! Embeds a batch of texts with one cache round trip and at most one
//! provider call.
//!
//! Each text maps to a content-addressed key (SHA-256 of model and text).
//! All keys are looked up together; only the unique missing texts go to the
//! provider, and the new vectors are written back together with the
//! extended TTL tier. Output order always matches input order.

use super::call::CallContext;
use super::key::{validate_tenant, KeyBuilder};
use super::serializer::Serializer;
use super::tiered::TieredStore;
use super::ttl::{Expiry, TtlPolicy, TtlTier};
use super::CacheSource;
use crate::constants::{components, data_types};
use crate::error::{CacheError, CacheResult, Phase};
use crate::metrics::{CacheEvent, MetricsSink};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Computes embeddings for a batch of texts
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>>;
}

/// [`EmbeddingProvider`] over an async closure
pub struct FnEmbedder<F>(F);

/// Adapt an async closure into an [`EmbeddingProvider`]
pub fn embed_fn<F, Fut>(f: F) -> FnEmbedder<F>
where
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<Vec<f64>>>> + Send,
{
    FnEmbedder(f)
}

#[async_trait]
impl<F, Fut> EmbeddingProvider for FnEmbedder<F>
where
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<Vec<f64>>>> + Send,
{
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>> {
        (self.0)(texts.to_vec()).await
    }
}

/// Aggregate outcome of one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchMetrics {
    /// Input texts, duplicates included
    pub total: usize,
    pub hits: usize,
    pub misses: usize,
    /// Texts actually sent to the provider
    pub embedded: usize,
    pub provider_calls: usize,
    /// False when new vectors could not be written back
    pub written: bool,
    pub lookup: Duration,
    pub embed: Option<Duration>,
    pub populate: Option<Duration>,
}

impl BatchMetrics {
    /// 0.0 to 1.0; 0.0 for an empty batch
    pub fn hit_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hits as f64 / self.total as f64
        }
    }
}

#[derive(Clone)]
pub struct BatchEmbeddingCache {
    keys: KeyBuilder,
    store: TieredStore,
    policy: Arc<TtlPolicy>,
    data_type: String,
    embed_timeout: Duration,
}

impl fmt::Debug for BatchEmbeddingCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchEmbeddingCache")
            .field("keys", &self.keys)
            .field("data_type", &self.data_type)
            .field("embed_timeout", &self.embed_timeout)
            .finish()
    }
}

impl BatchEmbeddingCache {
    pub fn new(
        keys: KeyBuilder,
        store: TieredStore,
        policy: Arc<TtlPolicy>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            keys,
            store,
            policy,
            data_type: data_types::EMBEDDING.to_string(),
            embed_timeout,
        }
    }

    /// Store under another vector data type, e.g. `query_embedding`
    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = data_type.into();
        self
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    fn metrics(&self) -> &Arc<dyn MetricsSink> {
        self.store.metrics()
    }

    fn expiry(&self) -> Expiry {
        self.policy.tier(TtlTier::Extended)
    }

    pub async fn get_or_embed_batch(
        &self,
        texts: &[String],
        tenant_id: &str,
        model: &str,
        provider: &dyn EmbeddingProvider,
    ) -> CacheResult<(Vec<Vec<f64>>, BatchMetrics)> {
        self.get_or_embed_batch_with(texts, tenant_id, model, provider, None)
            .await
    }

    /// [`get_or_embed_batch`](Self::get_or_embed_batch) honoring a
    /// cancellation signal
    pub async fn get_or_embed_batch_with(
        &self,
        texts: &[String],
        tenant_id: &str,
        model: &str,
        provider: &dyn EmbeddingProvider,
        cancellation: Option<CancellationToken>,
    ) -> CacheResult<(Vec<Vec<f64>>, BatchMetrics)> {
        let mut metrics = BatchMetrics {
            total: texts.len(),
            written: true,
            ..BatchMetrics::default()
        };
        validate_tenant(tenant_id)?;
        if model.is_empty() {
            return Err(CacheError::Validation("model must not be empty".to_string()));
        }
        if texts.is_empty() {
            return Ok((Vec::new(), metrics));
        }

        let ctx = CallContext::new(cancellation, None);
        let expiry = self.expiry();

        let keys: Vec<String> = texts
            .iter()
            .map(|text| self.keys.embedding_key(tenant_id, &self.data_type, model, text))
            .collect::<CacheResult<_>>()?;

        // Duplicate texts share one lookup and one provider slot
        let mut unique: Vec<usize> = Vec::new();
        let mut slot_of: HashMap<&str, usize> = HashMap::new();
        let slots: Vec<usize> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                *slot_of.entry(key.as_str()).or_insert_with(|| {
                    unique.push(i);
                    unique.len() - 1
                })
            })
            .collect();
        let unique_keys: Vec<String> = unique.iter().map(|&i| keys[i].clone()).collect();

        let started = Instant::now();
        let found = ctx
            .bounded(Phase::Lookup, None, async {
                Ok(self.store.get_many(&unique_keys).await)
            })
            .await?;
        metrics.lookup = started.elapsed();
        self.record_latency(Phase::Lookup, metrics.lookup);

        let mut vectors: Vec<Option<Vec<f64>>> = Vec::with_capacity(unique.len());
        let mut sources: Vec<Option<CacheSource>> = Vec::with_capacity(unique.len());
        for entry in found {
            match entry {
                Some((bytes, source)) => {
                    vectors.push(Some(Serializer::decode_vector(&bytes, &self.data_type)?));
                    sources.push(Some(source));
                }
                None => {
                    vectors.push(None);
                    sources.push(None);
                }
            }
        }

        let missing: Vec<usize> = (0..unique.len()).filter(|&s| vectors[s].is_none()).collect();
        if !missing.is_empty() {
            let missing_texts: Vec<String> =
                missing.iter().map(|&s| texts[unique[s]].clone()).collect();

            let started = Instant::now();
            metrics.provider_calls = 1;
            metrics.embedded = missing_texts.len();
            let embedded = ctx
                .bounded(Phase::Embed, Some(self.embed_timeout), async {
                    provider
                        .embed(&missing_texts)
                        .await
                        .map_err(|e| CacheError::source(Phase::Embed, e))
                })
                .await;
            let elapsed = started.elapsed();
            metrics.embed = Some(elapsed);
            self.record_latency(Phase::Embed, elapsed);
            let embedded = embedded?;

            if embedded.len() != missing_texts.len() {
                return Err(CacheError::Source {
                    phase: Phase::Embed,
                    message: format!(
                        "embedding provider returned {} vectors for {} texts",
                        embedded.len(),
                        missing_texts.len()
                    ),
                });
            }

            let entries: Vec<(String, Vec<u8>)> = missing
                .iter()
                .zip(&embedded)
                .map(|(&s, vector)| (unique_keys[s].clone(), Serializer::encode_vector(vector)))
                .collect();
            for (&s, vector) in missing.iter().zip(embedded) {
                vectors[s] = Some(vector);
            }

            let started = Instant::now();
            let written = ctx
                .bounded(Phase::Populate, None, self.store.set_many(entries, expiry))
                .await;
            let elapsed = started.elapsed();
            metrics.populate = Some(elapsed);
            self.record_latency(Phase::Populate, elapsed);

            match written {
                Ok(()) => {}
                Err(e) if e.is_store_failure() => {
                    metrics.written = false;
                    error!(
                        component = components::EMBEDDING_CACHE,
                        count = missing.len(),
                        error = %e,
                        "New embeddings could not be written back to the cache"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let mut results = Vec::with_capacity(texts.len());
        for &slot in &slots {
            let vector = vectors[slot].clone().ok_or_else(|| CacheError::Source {
                phase: Phase::Embed,
                message: "embedding missing after provider call".to_string(),
            })?;
            match sources[slot] {
                Some(source) => {
                    metrics.hits += 1;
                    self.metrics().record(CacheEvent::Hit {
                        data_type: self.data_type.clone(),
                        source,
                        tier: 0,
                    });
                }
                None => {
                    metrics.misses += 1;
                    self.metrics().record(CacheEvent::Miss {
                        data_type: self.data_type.clone(),
                        resolved_by: Some(CacheSource::Generated),
                    });
                }
            }
            results.push(vector);
        }

        debug!(
            total = metrics.total,
            hits = metrics.hits,
            misses = metrics.misses,
            embedded = metrics.embedded,
            "Embedding batch resolved"
        );
        Ok((results, metrics))
    }

    fn record_latency(&self, phase: Phase, duration: Duration) {
        self.metrics().record(CacheEvent::Latency {
            data_type: self.data_type.clone(),
            phase,
            duration,
        });
    }
}
