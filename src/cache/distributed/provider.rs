//! Distributed store provider with integrated circuit breaker
//!
//! Uses enum dispatch for zero-cost abstraction over the backends. Every
//! operation runs under its own timeout, distinct from the source fetch
//! timeout, so a slow store cannot starve the database fallback.
//!
//! For distributed backends a circuit breaker fails fast once the store
//! keeps failing. An open circuit yields [`DistributedStoreError::CircuitOpen`];
//! the tiered store turns that into a miss on reads and an error on writes.

use super::errors::{DistributedStoreError, StoreResult};
use super::providers::{MemoryStore, NoOpStore};
use super::traits::{DistributedStore, StoredValue};
use crate::cache::ttl::Expiry;
use crate::config::{CircuitBreakerSettings, DistributedStoreConfig};
use crate::constants::components;
use crate::resilience::{CircuitBreaker, CircuitBreakerMetrics, CircuitState};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[cfg(feature = "cache-redis")]
use super::providers::RedisStore;

/// Internal backend enum for zero-cost dispatch
#[derive(Debug, Clone)]
enum StoreBackend {
    /// Redis/Dragonfly (boxed to reduce enum size)
    #[cfg(feature = "cache-redis")]
    Redis(Box<RedisStore>),

    /// In-process store with native TTL
    Memory(MemoryStore),

    /// Always miss, always succeed
    NoOp(NoOpStore),
}

impl StoreBackend {
    fn is_distributed(&self) -> bool {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.is_distributed(),
            Self::Memory(s) => s.is_distributed(),
            Self::NoOp(s) => s.is_distributed(),
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
        }
    }

    fn is_enabled(&self) -> bool {
        !matches!(self, Self::NoOp(_))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredValue>> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
            Self::NoOp(s) => s.get(key).await,
        }
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<StoredValue>>> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.get_many(keys).await,
            Self::Memory(s) => s.get_many(keys).await,
            Self::NoOp(s) => s.get_many(keys).await,
        }
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> StoreResult<()> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.set(key, value, expiry).await,
            Self::Memory(s) => s.set(key, value, expiry).await,
            Self::NoOp(s) => s.set(key, value, expiry).await,
        }
    }

    async fn set_many(&self, entries: &[(String, Vec<u8>)], expiry: Expiry) -> StoreResult<()> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.set_many(entries, expiry).await,
            Self::Memory(s) => s.set_many(entries, expiry).await,
            Self::NoOp(s) => s.set_many(entries, expiry).await,
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.delete(key).await,
            Self::Memory(s) => s.delete(key).await,
            Self::NoOp(s) => s.delete(key).await,
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> StoreResult<u64> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.delete_pattern(pattern).await,
            Self::Memory(s) => s.delete_pattern(pattern).await,
            Self::NoOp(s) => s.delete_pattern(pattern).await,
        }
    }

    async fn health_check(&self) -> StoreResult<bool> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.health_check().await,
            Self::Memory(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
        }
    }
}

/// Distributed tier with timeout and circuit breaker protection.
///
/// ## Backends
///
/// - **Redis/Dragonfly**: shared state for multi-instance deployments
/// - **Memory**: in-process, for single-instance deployments and tests
/// - **NoOp**: always-miss fallback when no distributed tier is available
#[derive(Clone)]
pub struct DistributedStoreProvider {
    backend: StoreBackend,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    operation_timeout: Duration,
    /// The configured backend could not be built and NoOp stands in
    fell_back: bool,
}

impl std::fmt::Debug for DistributedStoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedStoreProvider")
            .field("backend", &self.backend)
            .field(
                "circuit_breaker",
                &self.circuit_breaker.as_ref().map(|cb| cb.state()),
            )
            .field("operation_timeout", &self.operation_timeout)
            .field("fell_back", &self.fell_back)
            .finish()
    }
}

impl DistributedStoreProvider {
    /// Create a provider from configuration with graceful degradation.
    ///
    /// If Redis is configured but unreachable, logs a warning and falls
    /// back to NoOp: the engine never fails to start because of its cache.
    pub async fn from_config_graceful(
        config: &DistributedStoreConfig,
        cb_settings: &CircuitBreakerSettings,
    ) -> Self {
        let backend = Self::create_backend(config).await;
        let fell_back =
            !backend.is_enabled() && !matches!(config.backend.as_str(), "noop" | "none");

        // Only distributed, enabled backends get a breaker
        let circuit_breaker = (cb_settings.enabled
            && backend.is_distributed()
            && backend.is_enabled())
        .then(|| {
            Arc::new(CircuitBreaker::new(
                components::DISTRIBUTED_STORE.to_string(),
                cb_settings.to_resilience_config(),
            ))
        });

        Self {
            backend,
            circuit_breaker,
            operation_timeout: config.operation_timeout(),
            fell_back,
        }
    }

    async fn create_backend(config: &DistributedStoreConfig) -> StoreBackend {
        match config.backend.as_str() {
            // "dragonfly" speaks the Redis protocol
            "redis" | "dragonfly" => Self::create_redis_backend(config).await,
            "memory" | "in-memory" => {
                info!(backend = "memory", "In-process distributed store initialized");
                StoreBackend::Memory(MemoryStore::new())
            }
            "noop" | "none" => {
                info!("Distributed store disabled by configuration");
                StoreBackend::NoOp(NoOpStore::new())
            }
            other => {
                warn!(backend = other, "Unknown distributed store backend, falling back to NoOp");
                StoreBackend::NoOp(NoOpStore::new())
            }
        }
    }

    #[cfg(feature = "cache-redis")]
    async fn create_redis_backend(config: &DistributedStoreConfig) -> StoreBackend {
        let Some(redis_config) = &config.redis else {
            warn!("Redis backend selected but no [l2.redis] config found, falling back to NoOp");
            return StoreBackend::NoOp(NoOpStore::new());
        };

        match RedisStore::from_config(redis_config).await {
            Ok(store) => {
                info!(backend = "redis", "Distributed store initialized successfully");
                StoreBackend::Redis(Box::new(store))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to connect to Redis, falling back to NoOp store (graceful degradation)"
                );
                StoreBackend::NoOp(NoOpStore::new())
            }
        }
    }

    #[cfg(not(feature = "cache-redis"))]
    async fn create_redis_backend(_config: &DistributedStoreConfig) -> StoreBackend {
        warn!("Redis backend requested but 'cache-redis' feature not enabled, using NoOp");
        StoreBackend::NoOp(NoOpStore::new())
    }

    /// NoOp provider (explicit opt-out or testing)
    pub fn noop() -> Self {
        Self {
            backend: StoreBackend::NoOp(NoOpStore::new()),
            circuit_breaker: None,
            operation_timeout: Duration::from_millis(250),
            fell_back: false,
        }
    }

    /// Provider over an existing in-process store, optionally guarded by a
    /// breaker. Tests keep a clone of `store` to flip its outage switch.
    pub fn in_memory(
        store: MemoryStore,
        operation_timeout: Duration,
        circuit_breaker: Option<Arc<CircuitBreaker>>,
    ) -> Self {
        Self {
            backend: StoreBackend::Memory(store),
            circuit_breaker,
            operation_timeout,
            fell_back: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_enabled()
    }

    pub fn is_distributed(&self) -> bool {
        self.backend.is_distributed()
    }

    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    /// True when the configured backend was unavailable at startup and the
    /// provider runs as NoOp instead
    pub fn is_fallback(&self) -> bool {
        self.fell_back
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// `None` when no circuit breaker is configured
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_breaker.as_ref().map(|cb| cb.state())
    }

    pub fn circuit_metrics(&self) -> Option<CircuitBreakerMetrics> {
        self.circuit_breaker.as_ref().map(|cb| cb.metrics())
    }

    /// Run one backend call under the operation timeout and the breaker
    async fn guarded<T, F, Fut>(&self, operation: &'static str, call: F) -> StoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        if let Some(cb) = &self.circuit_breaker {
            if !cb.should_allow() {
                debug!(operation = operation, "Distributed store circuit open, failing fast");
                return Err(DistributedStoreError::CircuitOpen { operation });
            }
        }

        let start = Instant::now();
        let result = match tokio::time::timeout(self.operation_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(DistributedStoreError::Timeout {
                operation,
                timeout_ms: self.operation_timeout.as_millis() as u64,
            }),
        };
        let duration = start.elapsed();

        if let Some(cb) = &self.circuit_breaker {
            match &result {
                Ok(_) => cb.record_success(duration),
                Err(_) => cb.record_failure(duration),
            }
        }

        result
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<StoredValue>> {
        self.guarded("get", || self.backend.get(key)).await
    }

    pub async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<StoredValue>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.guarded("get_many", || self.backend.get_many(keys)).await
    }

    pub async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> StoreResult<()> {
        self.guarded("set", || self.backend.set(key, value, expiry))
            .await
    }

    pub async fn set_many(&self, entries: &[(String, Vec<u8>)], expiry: Expiry) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.guarded("set_many", || self.backend.set_many(entries, expiry))
            .await
    }

    pub async fn delete(&self, key: &str) -> StoreResult<u64> {
        self.guarded("delete", || self.backend.delete(key)).await
    }

    pub async fn delete_pattern(&self, pattern: &str) -> StoreResult<u64> {
        self.guarded("delete_pattern", || self.backend.delete_pattern(pattern))
            .await
    }

    /// Open circuit or failure reports unhealthy rather than erroring
    pub async fn health_check(&self) -> bool {
        match self.guarded("health_check", || self.backend.health_check()).await {
            Ok(healthy) => healthy,
            Err(e) => {
                debug!(error = %e, "Distributed store health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitBreakerConfig;

    fn breaker(threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "test_store".to_string(),
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout: Duration::from_secs(30),
                success_threshold: 1,
            },
        ))
    }

    #[tokio::test]
    async fn test_noop_provider_is_not_enabled() {
        let provider = DistributedStoreProvider::noop();
        assert!(!provider.is_enabled());
        assert_eq!(provider.provider_name(), "noop");
        assert!(provider.circuit_state().is_none());
    }

    #[tokio::test]
    async fn test_from_config_unknown_backend() {
        let config = DistributedStoreConfig {
            backend: "unknown_backend".to_string(),
            ..DistributedStoreConfig::default()
        };
        let provider =
            DistributedStoreProvider::from_config_graceful(&config, &CircuitBreakerSettings::default())
                .await;
        assert!(!provider.is_enabled());
        assert!(provider.is_fallback());
    }

    #[tokio::test]
    async fn test_explicit_noop_is_not_a_fallback() {
        let config = DistributedStoreConfig {
            backend: "noop".to_string(),
            ..DistributedStoreConfig::default()
        };
        let provider =
            DistributedStoreProvider::from_config_graceful(&config, &CircuitBreakerSettings::default())
                .await;
        assert!(!provider.is_enabled());
        assert!(!provider.is_fallback());
    }

    #[tokio::test]
    async fn test_from_config_memory_has_no_breaker() {
        let config = DistributedStoreConfig {
            backend: "in-memory".to_string(),
            ..DistributedStoreConfig::default()
        };
        let provider =
            DistributedStoreProvider::from_config_graceful(&config, &CircuitBreakerSettings::default())
                .await;
        assert!(provider.is_enabled());
        assert_eq!(provider.provider_name(), "memory");
        assert!(!provider.is_distributed());
        assert!(provider.circuit_state().is_none());
    }

    #[cfg(feature = "cache-redis")]
    #[tokio::test]
    async fn test_from_config_redis_without_section_falls_back() {
        let config = DistributedStoreConfig {
            backend: "dragonfly".to_string(),
            redis: None,
            ..DistributedStoreConfig::default()
        };
        let provider =
            DistributedStoreProvider::from_config_graceful(&config, &CircuitBreakerSettings::default())
                .await;
        assert!(!provider.is_enabled());
        assert!(provider.is_fallback());
    }

    #[tokio::test]
    async fn test_timeout_applies_per_operation() {
        let store = MemoryStore::new();
        store.set_latency(Duration::from_millis(100));
        let provider = DistributedStoreProvider::in_memory(store, Duration::from_millis(10), None);

        assert!(matches!(
            provider.get("k").await,
            Err(DistributedStoreError::Timeout { operation: "get", .. })
        ));
    }

    #[tokio::test]
    async fn test_breaker_opens_and_fails_fast() {
        let store = MemoryStore::new();
        let provider = DistributedStoreProvider::in_memory(
            store.clone(),
            Duration::from_millis(100),
            Some(breaker(2)),
        );

        store.set_unavailable(true);
        assert!(provider.get("k").await.is_err());
        assert!(provider.get("k").await.is_err());
        assert_eq!(provider.circuit_state(), Some(CircuitState::Open));

        // Backend recovered, but the open circuit still fails fast
        store.set_unavailable(false);
        assert!(matches!(
            provider.set("k", b"v", Expiry::from_secs(60)).await,
            Err(DistributedStoreError::CircuitOpen { operation: "set" })
        ));
        assert!(!provider.health_check().await);
    }
}
