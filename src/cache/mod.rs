//! # Cache Core
//!
//! Tenant-aware keys, value encoding, TTL policy and the two storage tiers,
//! plus the three services built on them:
//!
//! - [`CacheAsideOrchestrator`]: read-through with database fallback and
//!   optional generation
//! - [`InvalidationCoordinator`]: cascading deletes over the dependency graph
//! - [`BatchEmbeddingCache`]: one round trip and one provider call per batch
//!
//! Nothing here is a process-wide singleton. Build a
//! [`CacheEngine`](crate::engine::CacheEngine) (or the pieces directly) and
//! pass it where it is needed.

mod call;
pub mod distributed;
pub mod embedding;
pub mod invalidation;
pub mod key;
pub mod local;
pub mod orchestrator;
pub mod serializer;
pub mod tiered;
pub mod ttl;

pub use distributed::{DistributedStore, DistributedStoreError, DistributedStoreProvider, MemoryStore};
pub use embedding::{embed_fn, BatchEmbeddingCache, BatchMetrics, EmbeddingProvider};
pub use invalidation::{
    lookup_fn, ConversationLookup, DataTypeRule, DependencyGraph, DependencyRule, DependencyScope,
    InvalidationCoordinator, InvalidationCounts, InvalidationRequest,
};
pub use key::{CacheKey, ContextField, KeyBuilder, KeyLookupChain};
pub use local::{LocalStore, LocalStoreStats};
pub use orchestrator::{
    fetch_fn, generate_fn, CacheAsideOrchestrator, CacheSource, LoadOptions, LoadOutcome,
    OperationMetrics, PhaseTimings, SourceFetcher, ValueGenerator,
};
pub use serializer::{CacheValue, Flattenable, HostTransfer, OnHost, Serializer, ValueCodec};
pub use tiered::TieredStore;
pub use ttl::{Expiry, TtlPolicy, TtlSetting, TtlTier};
