#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, OpenTelemetry in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # TierCache Core
//!
//! Multi-tenant tiered cache-aside engine for the platform's services:
//! agent configuration, conversation memory, job-queue metadata and RAG
//! query results all go through one contract.
//!
//! ## Key Features
//!
//! - **Hierarchical keys**: six lookup tiers from agent + conversation +
//!   collection down to tenant + resource, glob-safe and collision-free
//! - **Two tiers**: bounded process-local L1 in front of Redis/Dragonfly L2,
//!   with per-operation timeouts and a circuit breaker on L2
//! - **TTL policy**: per-service overrides, global defaults, hard fallback
//! - **Cascading invalidation** over an immutable dependency graph
//! - **Batch embeddings**: one lookup round trip and one provider call per
//!   batch
//! - **Telemetry**: non-blocking metrics sink feeding OpenTelemetry
//!
//! ## Module Organization
//!
//! - [`cache`] - Keys, serializer, TTL policy, tiers and the cache services
//! - [`engine`] - Wiring from configuration, health, shutdown
//! - [`config`] - Configuration loading and validation
//! - [`metrics`] - Cache events, sinks and statistics
//! - [`resilience`] - Circuit breaker for the distributed tier
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tiercache_core::cache::{fetch_fn, CacheKey, CacheValue, LoadOptions};
//! use tiercache_core::config::CacheEngineConfig;
//! use tiercache_core::engine::CacheEngine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CacheEngine::from_config(CacheEngineConfig::default()).await?;
//!
//! let key = CacheKey::new("tenant-1", "agent_config", "agent-42").with_agent("agent-42");
//! let fetcher = fetch_fn(|key: CacheKey| async move {
//!     // Load from the database here
//!     Ok::<_, anyhow::Error>(Some(CacheValue::from(serde_json::json!({ "id": key.resource_id() }))))
//! });
//!
//! let outcome = engine
//!     .orchestrator()
//!     .get_or_load(&key, &fetcher, None, LoadOptions::default())
//!     .await?;
//! println!("served from {:?}", outcome.source());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit tests live beside the code; integration tests under `tests/` run
//! against the in-process distributed backend. Redis-backed tests need the
//! `test-services` feature and `REDIS_URL`.

pub mod cache;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod resilience;

pub use cache::{
    CacheAsideOrchestrator, CacheKey, CacheSource, CacheValue, InvalidationCoordinator,
    InvalidationRequest, KeyBuilder, LoadOptions, LoadOutcome, TieredStore,
};
pub use config::{CacheEngineConfig, ConfigManager};
pub use engine::{CacheEngine, CacheHealth, HealthStatus};
pub use error::{CacheError, CacheResult, Phase};
pub use logging::init_structured_logging;
pub use metrics::{CacheEvent, CacheStatistics, MetricsSink};
