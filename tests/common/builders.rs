//! Shared harness for integration tests: an in-process distributed tier,
//! a recording metrics sink and counting collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::cache::{
    BatchEmbeddingCache, CacheAsideOrchestrator, CacheKey, CacheValue, ConversationLookup,
    DependencyGraph, DistributedStoreProvider, EmbeddingProvider, InvalidationCoordinator,
    KeyBuilder, LocalStore, MemoryStore, Serializer, SourceFetcher, TieredStore, TtlPolicy,
    ValueGenerator,
};
use tiercache_core::config::TimeoutConfig;
use tiercache_core::metrics::{CacheEvent, MetricsSink};
use tiercache_core::resilience::{CircuitBreaker, CircuitBreakerConfig};

pub const TENANT: &str = "tenant-1";
pub const PREFIX: &str = "tc";

/// Keeps every event for later assertions
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CacheEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }
}

impl MetricsSink for RecordingSink {
    fn record(&self, event: CacheEvent) {
        self.events.lock().push(event);
    }
}

/// Builder for the components under test, all sharing one tiered store
pub struct Harness {
    pub keys: KeyBuilder,
    pub backend: MemoryStore,
    pub store: TieredStore,
    pub sink: Arc<RecordingSink>,
    pub policy: Arc<TtlPolicy>,
    pub breaker: Option<Arc<CircuitBreaker>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(true, None)
    }

    /// Distributed tier only; every hit is observable in the backend
    pub fn without_l1() -> Self {
        Self::build(false, None)
    }

    /// Distributed tier guarded by a breaker that opens after `threshold`
    /// consecutive failures
    pub fn with_breaker(threshold: u32) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            "test_distributed_store".to_string(),
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout: Duration::from_secs(30),
                success_threshold: 1,
            },
        ));
        Self::build(true, Some(breaker))
    }

    fn build(l1: bool, breaker: Option<Arc<CircuitBreaker>>) -> Self {
        let backend = MemoryStore::new();
        let sink = Arc::new(RecordingSink::default());
        let local =
            l1.then(|| Arc::new(LocalStore::new(256, 0.2, Duration::from_secs(300))));
        let distributed = DistributedStoreProvider::in_memory(
            backend.clone(),
            Duration::from_millis(100),
            breaker.clone(),
        );
        let store = TieredStore::new(local, distributed, Arc::clone(&sink) as Arc<dyn MetricsSink>);

        Self {
            keys: KeyBuilder::new(PREFIX),
            backend,
            store,
            sink,
            policy: Arc::new(TtlPolicy::default()),
            breaker,
        }
    }

    pub fn timeouts() -> TimeoutConfig {
        TimeoutConfig {
            source_fetch_ms: 200,
            generate_ms: 200,
            embed_ms: 200,
        }
    }

    pub fn orchestrator(&self) -> CacheAsideOrchestrator {
        CacheAsideOrchestrator::new(
            self.keys.clone(),
            self.store.clone(),
            Arc::new(Serializer::default()),
            Arc::clone(&self.policy),
            Self::timeouts(),
        )
    }

    pub fn invalidation(&self) -> InvalidationCoordinator {
        InvalidationCoordinator::new(
            self.keys.clone(),
            self.store.clone(),
            Arc::new(DependencyGraph::platform_default()),
            Duration::from_millis(200),
        )
    }

    pub fn embeddings(&self) -> BatchEmbeddingCache {
        BatchEmbeddingCache::new(
            self.keys.clone(),
            self.store.clone(),
            Arc::clone(&self.policy),
            Duration::from_millis(200),
        )
    }

    /// Drop L1 so the next read has to go to the distributed tier
    pub fn clear_local(&self) {
        if let Some(local) = self.store.local() {
            local.clear();
        }
    }
}

/// Fetcher returning a fixed value and counting calls
pub struct CountingFetcher {
    value: Option<CacheValue>,
    delay: Option<Duration>,
    fail: bool,
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn returning(value: impl Into<CacheValue>) -> Self {
        Self {
            value: Some(value.into()),
            delay: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn not_found() -> Self {
        Self {
            value: None,
            delay: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::not_found()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for CountingFetcher {
    async fn fetch(&self, _key: &CacheKey) -> anyhow::Result<Option<CacheValue>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("database connection refused");
        }
        Ok(self.value.clone())
    }
}

/// Generator that derives a value from the key and counts calls
#[derive(Default)]
pub struct CountingGenerator {
    fail: bool,
    calls: AtomicUsize,
}

impl CountingGenerator {
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValueGenerator for CountingGenerator {
    async fn generate(&self, key: &CacheKey) -> anyhow::Result<CacheValue> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("model endpoint returned 503");
        }
        Ok(CacheValue::from(serde_json::json!({
            "generated_for": key.resource_id(),
        })))
    }
}

/// Embedding provider that records each batch it receives.
///
/// The vector for a text is `[len, first byte]`, so tests can check
/// that results line up with their inputs.
#[derive(Default)]
pub struct RecordingEmbedder {
    batches: Mutex<Vec<Vec<String>>>,
    short_by_one: bool,
}

impl RecordingEmbedder {
    /// Returns one vector fewer than requested
    pub fn short_by_one() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            short_by_one: true,
        }
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }

    pub fn vector_for(text: &str) -> Vec<f64> {
        vec![
            text.len() as f64,
            text.bytes().next().map(f64::from).unwrap_or_default(),
        ]
    }
}

#[async_trait]
impl EmbeddingProvider for RecordingEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>> {
        self.batches.lock().push(texts.to_vec());
        let mut vectors: Vec<Vec<f64>> = texts.iter().map(|t| Self::vector_for(t)).collect();
        if self.short_by_one {
            vectors.pop();
        }
        Ok(vectors)
    }
}

/// Fixed agent -> conversations mapping
pub struct StaticConversations(pub Vec<String>);

#[async_trait]
impl ConversationLookup for StaticConversations {
    async fn related_conversations(
        &self,
        _tenant_id: &str,
        _agent_id: &str,
    ) -> anyhow::Result<Vec<String>> {
        Ok(self.0.clone())
    }
}
