//! # Cache Engine Configuration
//!
//! Every recognized option of the engine lives here: per-service TTL
//! overrides, L1 capacity and eviction fraction, L2 connection parameters
//! and timeouts, metrics switches and the invalidation dependency graph.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tiercache_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Defaults -> config/tiercache.toml -> config/tiercache.<env>.toml -> TIERCACHE__* env
//! let manager = ConfigManager::load()?;
//! let l1_capacity = manager.config().l1.capacity;
//! # Ok(())
//! # }
//! ```

pub mod loader;

use crate::cache::invalidation::{DependencyRule, DataTypeRule};
use crate::cache::ttl::TtlSetting;
use crate::constants::{data_types, ttl, DEFAULT_KEY_PREFIX};
use crate::error::{CacheError, CacheResult};
use crate::resilience::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/tiercache.toml`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheEngineConfig {
    /// Namespace prefix for every rendered key
    pub key_prefix: String,

    /// Service scope used for TTL override resolution when the caller
    /// does not name one
    pub service_scope: Option<String>,

    /// Process-local tier
    pub l1: LocalStoreConfig,

    /// Distributed tier
    pub l2: DistributedStoreConfig,

    pub ttl: TtlConfig,

    pub timeouts: TimeoutConfig,

    pub metrics: MetricsConfig,

    pub serializer: SerializerConfig,

    /// Circuit breaker guarding the distributed tier
    pub circuit_breaker: CircuitBreakerSettings,

    pub invalidation: InvalidationConfig,
}

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            service_scope: None,
            l1: LocalStoreConfig::default(),
            l2: DistributedStoreConfig::default(),
            ttl: TtlConfig::default(),
            timeouts: TimeoutConfig::default(),
            metrics: MetricsConfig::default(),
            serializer: SerializerConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            invalidation: InvalidationConfig::default(),
        }
    }
}

impl CacheEngineConfig {
    /// Test-optimized configuration: in-process distributed tier, tiny L1,
    /// short timeouts, no background sweeper
    pub fn for_test() -> Self {
        Self {
            l1: LocalStoreConfig {
                capacity: 128,
                sweep_interval_ms: 0,
                ..LocalStoreConfig::default()
            },
            l2: DistributedStoreConfig {
                backend: "memory".to_string(),
                operation_timeout_ms: 100,
                redis: None,
            },
            timeouts: TimeoutConfig {
                source_fetch_ms: 500,
                generate_ms: 1_000,
                embed_ms: 1_000,
            },
            ..Self::default()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> CacheResult<()> {
        if self.key_prefix.is_empty() {
            return Err(CacheError::Configuration(
                "key_prefix must not be empty".to_string(),
            ));
        }
        if self
            .key_prefix
            .chars()
            .any(|c| matches!(c, ':' | '*' | '?' | '[' | ']' | '\\'))
        {
            return Err(CacheError::Configuration(format!(
                "key_prefix '{}' must not contain ':' or glob characters",
                self.key_prefix
            )));
        }

        self.l1.validate()?;
        self.l2.validate()?;
        self.ttl.validate()?;
        self.timeouts.validate()?;

        if self.metrics.enabled && self.metrics.channel_capacity == 0 {
            return Err(CacheError::Configuration(
                "metrics.channel_capacity must be greater than 0".to_string(),
            ));
        }

        self.circuit_breaker
            .to_resilience_config()
            .validate()
            .map_err(|e| CacheError::Configuration(format!("circuit_breaker: {e}")))?;

        Ok(())
    }
}

/// Process-local (L1) tier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    pub enabled: bool,

    /// Maximum number of entries before eviction
    pub capacity: usize,

    /// Fraction of `capacity` evicted at once when full (0.0, 1.0]
    pub eviction_fraction: f64,

    /// Upper bound on how long an entry may live in L1 regardless of its TTL
    pub max_ttl_seconds: u64,

    /// Background sweep interval; 0 disables the sweeper
    pub sweep_interval_ms: u64,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
            eviction_fraction: 0.1,
            max_ttl_seconds: 300,
            sweep_interval_ms: 30_000,
        }
    }
}

impl LocalStoreConfig {
    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }

    fn validate(&self) -> CacheResult<()> {
        if self.capacity == 0 {
            return Err(CacheError::Configuration(
                "l1.capacity must be greater than 0".to_string(),
            ));
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(CacheError::Configuration(format!(
                "l1.eviction_fraction must be in (0.0, 1.0], got {}",
                self.eviction_fraction
            )));
        }
        Ok(())
    }
}

/// Distributed (L2) tier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DistributedStoreConfig {
    /// `redis` (alias `dragonfly`), `memory` (alias `in-memory`) or `noop`
    pub backend: String,

    /// Per-operation timeout, distinct from the source fetch timeout
    pub operation_timeout_ms: u64,

    pub redis: Option<RedisConfig>,
}

impl Default for DistributedStoreConfig {
    fn default() -> Self {
        Self {
            backend: "noop".to_string(),
            operation_timeout_ms: 250,
            redis: None,
        }
    }
}

impl DistributedStoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    fn validate(&self) -> CacheResult<()> {
        if self.operation_timeout_ms == 0 {
            return Err(CacheError::Configuration(
                "l2.operation_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub url: String,

    #[serde(default = "default_redis_connect_timeout_ms")]
    pub connection_timeout_ms: u64,
}

fn default_redis_connect_timeout_ms() -> u64 {
    2_000
}

impl RedisConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// TTL tiers and the two override layers
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TtlConfig {
    pub short_seconds: u64,
    pub standard_seconds: u64,
    pub extended_seconds: u64,

    /// Global `data_type -> setting` defaults
    pub defaults: HashMap<String, TtlSetting>,

    /// Per-service `scope -> data_type -> setting` overrides
    pub services: HashMap<String, HashMap<String, TtlSetting>>,
}

impl Default for TtlConfig {
    fn default() -> Self {
        use crate::cache::ttl::TtlTier;

        let defaults = [
            (data_types::AGENT, TtlTier::Standard),
            (data_types::AGENT_CONFIG, TtlTier::Standard),
            (data_types::AGENT_TOOLS, TtlTier::Standard),
            (data_types::AGENT_EXECUTION_STATE, TtlTier::Short),
            (data_types::CONVERSATION, TtlTier::Extended),
            (data_types::CONVERSATION_MEMORY, TtlTier::Extended),
            (data_types::CONVERSATION_MESSAGE, TtlTier::Extended),
            (data_types::COLLECTION_METADATA, TtlTier::Standard),
            (data_types::RAG_QUERY, TtlTier::Standard),
            (data_types::JOB_STATUS, TtlTier::Short),
            (data_types::JOB_RESULT, TtlTier::Standard),
            (data_types::EMBEDDING, TtlTier::Extended),
            (data_types::QUERY_EMBEDDING, TtlTier::Extended),
        ]
        .into_iter()
        .map(|(data_type, tier)| (data_type.to_string(), TtlSetting::Tier(tier)))
        .collect();

        Self {
            short_seconds: ttl::SHORT_SECONDS,
            standard_seconds: ttl::STANDARD_SECONDS,
            extended_seconds: ttl::EXTENDED_SECONDS,
            defaults,
            services: HashMap::new(),
        }
    }
}

impl TtlConfig {
    fn validate(&self) -> CacheResult<()> {
        if self.short_seconds == 0 || self.standard_seconds == 0 || self.extended_seconds == 0 {
            return Err(CacheError::Configuration(
                "ttl tier durations must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Collaborator timeouts, each distinct from the L2 operation timeout
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub source_fetch_ms: u64,
    pub generate_ms: u64,
    pub embed_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            source_fetch_ms: 2_000,
            generate_ms: 30_000,
            embed_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn source_fetch(&self) -> Duration {
        Duration::from_millis(self.source_fetch_ms)
    }

    pub fn generate(&self) -> Duration {
        Duration::from_millis(self.generate_ms)
    }

    pub fn embed(&self) -> Duration {
        Duration::from_millis(self.embed_ms)
    }

    fn validate(&self) -> CacheResult<()> {
        if self.source_fetch_ms == 0 || self.generate_ms == 0 || self.embed_ms == 0 {
            return Err(CacheError::Configuration(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Emit entry-size events on populate
    pub size_estimation: bool,

    /// Bounded event channel; events beyond it are dropped and counted
    pub channel_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_estimation: false,
            channel_capacity: 4_096,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Data types encoded as packed float vectors instead of JSON
    pub vector_data_types: Vec<String>,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            vector_data_types: vec![
                data_types::EMBEDDING.to_string(),
                data_types::QUERY_EMBEDDING.to_string(),
            ],
        }
    }
}

/// Circuit breaker settings in file-friendly units
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            timeout_seconds: 30,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
            success_threshold: self.success_threshold,
        }
    }
}

/// Dependency graph declaration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Start from the built-in platform graph before applying entries below
    pub use_default_graph: bool,

    /// Per-type rules (group deletion support)
    pub data_types: HashMap<String, DataTypeRule>,

    /// `resource_type -> dependents`; replaces the built-in entry for that type
    pub dependencies: HashMap<String, Vec<DependencyRule>>,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            use_default_graph: true,
            data_types: HashMap::new(),
            dependencies: HashMap::new(),
        }
    }
}
