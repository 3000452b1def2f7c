//! # Cache Engine
//!
//! Wires every component from one [`CacheEngineConfig`]: L1 and its
//! sweeper, the distributed tier (falling back to NoOp when Redis cannot be
//! reached), TTL policy, dependency graph and the metrics sink. The engine
//! owns the background tasks and stops them on [`CacheEngine::shutdown`].

use crate::cache::{
    BatchEmbeddingCache, CacheAsideOrchestrator, ConversationLookup, DependencyGraph,
    DistributedStoreProvider, InvalidationCoordinator, KeyBuilder, LocalStore, LocalStoreStats,
    Serializer, TieredStore, TtlPolicy,
};
use crate::config::CacheEngineConfig;
use crate::error::CacheResult;
use crate::metrics::{CacheStatistics, MetricsSink, NoOpMetricsSink, TelemetrySink};
use crate::resilience::{CircuitBreakerMetrics, CircuitState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Overall engine condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every configured tier is reachable
    Healthy,
    /// The distributed tier is unreachable, its circuit is open, or the
    /// configured backend was replaced by NoOp at startup
    Degraded,
}

/// Point-in-time health report
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub distributed_provider: &'static str,
    pub distributed_enabled: bool,
    pub distributed_healthy: bool,
    /// The configured backend could not be reached at startup
    pub distributed_fallback: bool,
    pub circuit_state: Option<CircuitState>,
    pub circuit_metrics: Option<CircuitBreakerMetrics>,
    pub local: Option<LocalStoreStats>,
    pub checked_at: DateTime<Utc>,
}

pub struct CacheEngine {
    config: Arc<CacheEngineConfig>,
    keys: KeyBuilder,
    store: TieredStore,
    orchestrator: CacheAsideOrchestrator,
    invalidation: InvalidationCoordinator,
    embeddings: BatchEmbeddingCache,
    telemetry: Option<Arc<TelemetrySink>>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("key_prefix", &self.keys.prefix())
            .field("store", &self.store)
            .field("telemetry", &self.telemetry.is_some())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl CacheEngine {
    /// Build the engine. Must run inside a tokio runtime.
    ///
    /// Only invalid configuration fails; an unreachable distributed store
    /// degrades to NoOp with a warning.
    pub async fn from_config(config: CacheEngineConfig) -> CacheResult<Self> {
        config.validate()?;
        let graph = Arc::new(DependencyGraph::from_config(&config.invalidation)?);

        let shutdown = CancellationToken::new();

        let local = config
            .l1
            .enabled
            .then(|| Arc::new(LocalStore::from_config(&config.l1)));
        let sweeper = match (&local, config.l1.sweep_interval()) {
            (Some(local), Some(interval)) => {
                Some(local.spawn_sweeper(interval, shutdown.child_token()))
            }
            _ => None,
        };

        let distributed =
            DistributedStoreProvider::from_config_graceful(&config.l2, &config.circuit_breaker)
                .await;

        let telemetry = config
            .metrics
            .enabled
            .then(|| TelemetrySink::spawn(config.metrics.channel_capacity, shutdown.child_token()));
        let sink: Arc<dyn MetricsSink> = match &telemetry {
            Some(sink) => Arc::clone(sink) as Arc<dyn MetricsSink>,
            None => Arc::new(NoOpMetricsSink),
        };

        let store = TieredStore::new(local, distributed, sink);
        let keys = KeyBuilder::new(config.key_prefix.clone());
        let policy = Arc::new(TtlPolicy::from_config(&config.ttl));
        let serializer = Arc::new(Serializer::from_config(&config.serializer));

        let orchestrator = CacheAsideOrchestrator::new(
            keys.clone(),
            store.clone(),
            serializer,
            Arc::clone(&policy),
            config.timeouts.clone(),
        )
        .with_size_estimation(config.metrics.size_estimation)
        .with_service_scope(config.service_scope.clone());

        let invalidation = InvalidationCoordinator::new(
            keys.clone(),
            store.clone(),
            graph,
            config.timeouts.source_fetch(),
        );

        let embeddings =
            BatchEmbeddingCache::new(keys.clone(), store.clone(), policy, config.timeouts.embed());

        info!(
            key_prefix = %config.key_prefix,
            l1_enabled = config.l1.enabled,
            l2_provider = store.distributed().provider_name(),
            metrics_enabled = config.metrics.enabled,
            "Cache engine initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            keys,
            store,
            orchestrator,
            invalidation,
            embeddings,
            telemetry,
            shutdown,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Enable agent -> conversation cascades
    pub fn with_conversation_lookup(mut self, lookup: Arc<dyn ConversationLookup>) -> Self {
        self.invalidation = self.invalidation.clone().with_conversation_lookup(lookup);
        self
    }

    pub fn config(&self) -> &CacheEngineConfig {
        &self.config
    }

    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &CacheAsideOrchestrator {
        &self.orchestrator
    }

    pub fn invalidation(&self) -> &InvalidationCoordinator {
        &self.invalidation
    }

    pub fn embeddings(&self) -> &BatchEmbeddingCache {
        &self.embeddings
    }

    /// Aggregated counters; all zero when metrics are disabled
    pub fn statistics(&self) -> CacheStatistics {
        self.telemetry
            .as_ref()
            .map(|sink| sink.statistics())
            .unwrap_or_default()
    }

    /// Wait until every event recorded so far is reflected in
    /// [`statistics`](Self::statistics)
    pub async fn flush_metrics(&self) {
        if let Some(sink) = &self.telemetry {
            sink.flush().await;
        }
    }

    pub async fn health(&self) -> CacheHealth {
        let distributed = self.store.distributed();
        let distributed_healthy = self.store.health_check().await;
        let distributed_fallback = distributed.is_fallback();
        let status = if distributed_healthy && !distributed_fallback {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        CacheHealth {
            status,
            distributed_provider: distributed.provider_name(),
            distributed_enabled: distributed.is_enabled(),
            distributed_healthy,
            distributed_fallback,
            circuit_state: distributed.circuit_state(),
            circuit_metrics: distributed.circuit_metrics(),
            local: self.store.local().map(|l1| l1.stats()),
            checked_at: Utc::now(),
        }
    }

    /// Stop the sweeper and drain the metrics worker. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!(error = %e, "L1 sweeper did not stop cleanly");
            }
        }
        if let Some(sink) = &self.telemetry {
            sink.join().await;
        }
        info!("Cache engine shut down");
    }
}

impl Drop for CacheEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
