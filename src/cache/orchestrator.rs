//! # Cache-Aside Orchestrator
//!
//! Read-through for one logical value:
//!
//! 1. Walk the lookup chain, most specific key first; the first hit wins.
//! 2. On a full miss, ask the [`SourceFetcher`]. A value is stored at the
//!    most specific key and returned with source `database`.
//! 3. If the fetcher finds nothing and a [`ValueGenerator`] was supplied,
//!    generate once, store identically, source `generated`.
//! 4. Otherwise report not-found (an empty [`LoadOutcome`], not an error).
//!
//! Collaborators run without any cache lock held. Concurrent misses for the
//! same key may both load and both populate; there is no single-flight.

use super::call::CallContext;
use super::key::{CacheKey, KeyBuilder, KeyLookupChain};
use super::serializer::{CacheValue, ValueCodec};
use super::tiered::TieredStore;
use super::ttl::{Expiry, TtlPolicy, TtlSetting};
use crate::config::TimeoutConfig;
use crate::constants::components;
use crate::error::{CacheError, CacheResult, Phase};
use crate::logging::log_cache_operation;
use crate::metrics::{CacheEvent, MetricsSink};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

/// Where a returned value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Memory,
    Distributed,
    Database,
    Generated,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSource::Memory => "memory",
            CacheSource::Distributed => "distributed",
            CacheSource::Database => "database",
            CacheSource::Generated => "generated",
        }
    }

    pub fn is_cache(&self) -> bool {
        matches!(self, CacheSource::Memory | CacheSource::Distributed)
    }
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time spent per phase; `None` for phases the call never reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhaseTimings {
    pub lookup: Option<Duration>,
    pub fetch: Option<Duration>,
    pub generate: Option<Duration>,
    pub populate: Option<Duration>,
}

impl PhaseTimings {
    fn set(&mut self, phase: Phase, duration: Duration) {
        match phase {
            Phase::Lookup => self.lookup = Some(duration),
            Phase::Fetch => self.fetch = Some(duration),
            Phase::Generate => self.generate = Some(duration),
            Phase::Populate => self.populate = Some(duration),
            _ => {}
        }
    }
}

/// Per-call record returned alongside the value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationMetrics {
    pub operation_id: Uuid,
    pub data_type: String,
    pub resource_id: String,
    /// `None` when nothing produced a value
    pub source: Option<CacheSource>,
    pub hit: bool,
    /// Lookup chain index of the key that hit
    pub tier: Option<usize>,
    /// False when a loaded value could not be written back
    pub populated: bool,
    pub timings: PhaseTimings,
    pub total: Duration,
}

impl OperationMetrics {
    fn new(key: &CacheKey) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            data_type: key.data_type().to_string(),
            resource_id: key.resource_id().to_string(),
            source: None,
            hit: false,
            tier: None,
            populated: false,
            timings: PhaseTimings::default(),
            total: Duration::ZERO,
        }
    }
}

/// Result of a cache-aside call. `value == None` means not found.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub value: Option<CacheValue>,
    pub metrics: OperationMetrics,
}

impl LoadOutcome {
    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }

    pub fn source(&self) -> Option<CacheSource> {
        self.metrics.source
    }
}

/// Per-call knobs
#[derive(Clone, Default)]
pub struct LoadOptions {
    /// Replaces the policy-resolved lifetime
    pub ttl_override: Option<TtlSetting>,
    /// Replaces the engine serializer for this call
    pub codec: Option<Arc<dyn ValueCodec>>,
    pub cancellation: Option<CancellationToken>,
    /// Whole-call budget, on top of the per-phase timeouts
    pub deadline: Option<Duration>,
    /// Service whose TTL overrides apply; defaults to the engine's scope
    pub service_scope: Option<String>,
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("ttl_override", &self.ttl_override)
            .field("codec", &self.codec.as_ref().map(|_| "custom"))
            .field("cancellation", &self.cancellation.is_some())
            .field("deadline", &self.deadline)
            .field("service_scope", &self.service_scope)
            .finish()
    }
}

impl LoadOptions {
    pub fn with_ttl(mut self, ttl: impl Into<TtlSetting>) -> Self {
        self.ttl_override = Some(ttl.into());
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_service_scope(mut self, scope: impl Into<String>) -> Self {
        self.service_scope = Some(scope.into());
        self
    }
}

/// Source of truth for a cached value (usually the database)
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// `Ok(None)` when the resource does not exist
    async fn fetch(&self, key: &CacheKey) -> anyhow::Result<Option<CacheValue>>;
}

/// Produces a value that no source holds (e.g. a model call)
#[async_trait]
pub trait ValueGenerator: Send + Sync {
    async fn generate(&self, key: &CacheKey) -> anyhow::Result<CacheValue>;
}

/// [`SourceFetcher`] over an async closure
pub struct FnFetcher<F>(F);

/// [`ValueGenerator`] over an async closure
pub struct FnGenerator<F>(F);

/// Adapt an async closure into a [`SourceFetcher`]
pub fn fetch_fn<F, Fut>(f: F) -> FnFetcher<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<CacheValue>>> + Send,
{
    FnFetcher(f)
}

/// Adapt an async closure into a [`ValueGenerator`]
pub fn generate_fn<F, Fut>(f: F) -> FnGenerator<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<CacheValue>> + Send,
{
    FnGenerator(f)
}

#[async_trait]
impl<F, Fut> SourceFetcher for FnFetcher<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<CacheValue>>> + Send,
{
    async fn fetch(&self, key: &CacheKey) -> anyhow::Result<Option<CacheValue>> {
        (self.0)(key.clone()).await
    }
}

#[async_trait]
impl<F, Fut> ValueGenerator for FnGenerator<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<CacheValue>> + Send,
{
    async fn generate(&self, key: &CacheKey) -> anyhow::Result<CacheValue> {
        (self.0)(key.clone()).await
    }
}

/// Uniform read-through/populate contract over the tiered store
#[derive(Clone)]
pub struct CacheAsideOrchestrator {
    keys: KeyBuilder,
    store: TieredStore,
    codec: Arc<dyn ValueCodec>,
    policy: Arc<TtlPolicy>,
    timeouts: TimeoutConfig,
    size_estimation: bool,
    service_scope: Option<String>,
}

impl fmt::Debug for CacheAsideOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheAsideOrchestrator")
            .field("keys", &self.keys)
            .field("store", &self.store)
            .field("timeouts", &self.timeouts)
            .field("size_estimation", &self.size_estimation)
            .field("service_scope", &self.service_scope)
            .finish()
    }
}

impl CacheAsideOrchestrator {
    pub fn new(
        keys: KeyBuilder,
        store: TieredStore,
        codec: Arc<dyn ValueCodec>,
        policy: Arc<TtlPolicy>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            keys,
            store,
            codec,
            policy,
            timeouts,
            size_estimation: false,
            service_scope: None,
        }
    }

    /// Emit an `EntrySize` event for every populated entry
    pub fn with_size_estimation(mut self, enabled: bool) -> Self {
        self.size_estimation = enabled;
        self
    }

    /// Default service scope for TTL resolution
    pub fn with_service_scope(mut self, scope: Option<String>) -> Self {
        self.service_scope = scope;
        self
    }

    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    fn metrics(&self) -> &Arc<dyn MetricsSink> {
        self.store.metrics()
    }

    fn codec<'a>(&'a self, options: &'a LoadOptions) -> &'a dyn ValueCodec {
        options.codec.as_deref().unwrap_or(self.codec.as_ref())
    }

    /// Lifetime for a populate: the override, else the policy
    pub fn resolve_expiry(&self, data_type: &str, options: &LoadOptions) -> Expiry {
        match options.ttl_override {
            Some(setting) => self.policy.setting(setting),
            None => {
                let scope = options
                    .service_scope
                    .as_deref()
                    .or(self.service_scope.as_deref());
                self.policy.resolve(scope, data_type)
            }
        }
    }

    fn record_latency(&self, data_type: &str, phase: Phase, duration: Duration) {
        self.metrics().record(CacheEvent::Latency {
            data_type: data_type.to_string(),
            phase,
            duration,
        });
    }

    /// Run one phase, recording its timing whether or not it succeeds
    async fn timed<T, Fut>(
        &self,
        ctx: &CallContext,
        metrics: &mut OperationMetrics,
        phase: Phase,
        limit: Option<Duration>,
        work: Fut,
    ) -> CacheResult<T>
    where
        Fut: Future<Output = CacheResult<T>>,
    {
        let started = Instant::now();
        let result = ctx.bounded(phase, limit, work).await;
        let elapsed = started.elapsed();
        metrics.timings.set(phase, elapsed);
        self.record_latency(&metrics.data_type, phase, elapsed);
        result
    }

    async fn lookup(&self, chain: &KeyLookupChain) -> Option<(usize, Vec<u8>, CacheSource)> {
        for (tier, key) in chain.distinct() {
            if let Some((bytes, source)) = self.store.get(key).await {
                return Some((tier, bytes, source));
            }
        }
        None
    }

    /// Read through the cache, falling back to `fetcher` then `generator`.
    ///
    /// Not-found is `Ok` with `value == None`. Fetch and generate failures
    /// abort the call as [`CacheError::Source`]. A failed write-back is
    /// logged and reported through `metrics.populated`; the loaded value is
    /// still returned.
    pub async fn get_or_load(
        &self,
        key: &CacheKey,
        fetcher: &dyn SourceFetcher,
        generator: Option<&dyn ValueGenerator>,
        options: LoadOptions,
    ) -> CacheResult<LoadOutcome> {
        let chain = self.keys.build(key)?;
        let ctx = CallContext::new(options.cancellation.clone(), options.deadline);
        let mut metrics = OperationMetrics::new(key);

        let result = self
            .load(key, &chain, fetcher, generator, &options, &ctx, &mut metrics)
            .await;
        metrics.total = ctx.elapsed();

        if let Err(e) = &result {
            debug!(
                operation_id = %metrics.operation_id,
                data_type = %metrics.data_type,
                error = %e,
                "Cache-aside call failed"
            );
        }
        let value = result?;

        log_cache_operation(
            components::ORCHESTRATOR,
            key.data_type(),
            key.resource_id(),
            metrics.source.map(|s| s.as_str()),
            metrics.hit,
            metrics.total.as_millis() as u64,
        );
        Ok(LoadOutcome { value, metrics })
    }

    #[allow(clippy::too_many_arguments)]
    async fn load(
        &self,
        key: &CacheKey,
        chain: &KeyLookupChain,
        fetcher: &dyn SourceFetcher,
        generator: Option<&dyn ValueGenerator>,
        options: &LoadOptions,
        ctx: &CallContext,
        metrics: &mut OperationMetrics,
    ) -> CacheResult<Option<CacheValue>> {
        let data_type = key.data_type();
        let codec = self.codec(options);

        let found = self
            .timed(ctx, metrics, Phase::Lookup, None, async {
                Ok(self.lookup(chain).await)
            })
            .await?;

        if let Some((tier, bytes, source)) = found {
            let value = codec.decode(&bytes, data_type)?;
            metrics.hit = true;
            metrics.source = Some(source);
            metrics.tier = Some(tier);
            self.metrics().record(CacheEvent::Hit {
                data_type: data_type.to_string(),
                source,
                tier,
            });
            return Ok(Some(value));
        }

        let fetched = self
            .timed(
                ctx,
                metrics,
                Phase::Fetch,
                Some(self.timeouts.source_fetch()),
                async {
                    fetcher
                        .fetch(key)
                        .await
                        .map_err(|e| CacheError::source(Phase::Fetch, e))
                },
            )
            .await?;

        let (value, source) = match (fetched, generator) {
            (Some(value), _) => (value, CacheSource::Database),
            (None, Some(generator)) => {
                let value = self
                    .timed(
                        ctx,
                        metrics,
                        Phase::Generate,
                        Some(self.timeouts.generate()),
                        async {
                            generator
                                .generate(key)
                                .await
                                .map_err(|e| CacheError::source(Phase::Generate, e))
                        },
                    )
                    .await?;
                (value, CacheSource::Generated)
            }
            (None, None) => {
                self.metrics().record(CacheEvent::Miss {
                    data_type: data_type.to_string(),
                    resolved_by: None,
                });
                return Ok(None);
            }
        };

        metrics.source = Some(source);
        self.metrics().record(CacheEvent::Miss {
            data_type: data_type.to_string(),
            resolved_by: Some(source),
        });

        let bytes = codec.encode(&value, data_type)?;
        let size = bytes.len();
        let expiry = self.resolve_expiry(data_type, options);

        let stored = self
            .timed(ctx, metrics, Phase::Populate, None, async {
                self.store.set(chain.primary(), bytes, expiry).await
            })
            .await;

        match stored {
            Ok(()) => {
                metrics.populated = true;
                if self.size_estimation {
                    self.metrics().record(CacheEvent::EntrySize {
                        data_type: data_type.to_string(),
                        bytes: size,
                    });
                }
            }
            Err(e) if e.is_store_failure() => {
                error!(
                    operation_id = %metrics.operation_id,
                    key = chain.primary(),
                    error = %e,
                    "Loaded value could not be written back to the cache"
                );
            }
            Err(e) => return Err(e),
        }

        Ok(Some(value))
    }

    /// Cache-only read: never calls a collaborator and never populates
    pub async fn peek(&self, key: &CacheKey, options: LoadOptions) -> CacheResult<LoadOutcome> {
        let chain = self.keys.build(key)?;
        let ctx = CallContext::new(options.cancellation.clone(), options.deadline);
        let mut metrics = OperationMetrics::new(key);

        let found = self
            .timed(&ctx, &mut metrics, Phase::Lookup, None, async {
                Ok(self.lookup(&chain).await)
            })
            .await?;
        metrics.total = ctx.elapsed();

        let value = match found {
            Some((tier, bytes, source)) => {
                let value = self.codec(&options).decode(&bytes, key.data_type())?;
                metrics.hit = true;
                metrics.source = Some(source);
                metrics.tier = Some(tier);
                self.metrics().record(CacheEvent::Hit {
                    data_type: key.data_type().to_string(),
                    source,
                    tier,
                });
                Some(value)
            }
            None => {
                self.metrics().record(CacheEvent::Miss {
                    data_type: key.data_type().to_string(),
                    resolved_by: None,
                });
                None
            }
        };

        Ok(LoadOutcome { value, metrics })
    }

    /// Write a known value at the most specific key.
    ///
    /// Unlike the populate step of [`get_or_load`](Self::get_or_load), a
    /// distributed store failure here is returned to the caller.
    pub async fn put(
        &self,
        key: &CacheKey,
        value: &CacheValue,
        options: LoadOptions,
    ) -> CacheResult<Expiry> {
        let primary = self.keys.primary_key(key)?;
        let ctx = CallContext::new(options.cancellation.clone(), options.deadline);
        let bytes = self.codec(&options).encode(value, key.data_type())?;
        let size = bytes.len();
        let expiry = self.resolve_expiry(key.data_type(), &options);

        let started = Instant::now();
        ctx.bounded(Phase::Populate, None, self.store.set(&primary, bytes, expiry))
            .await?;
        self.record_latency(key.data_type(), Phase::Populate, started.elapsed());

        if self.size_estimation {
            self.metrics().record(CacheEvent::EntrySize {
                data_type: key.data_type().to_string(),
                bytes: size,
            });
        }
        debug!(key = %primary, expiry = %expiry, "Cache entry written through");
        Ok(expiry)
    }
}
