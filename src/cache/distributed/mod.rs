//! # Distributed Store (L2)
//!
//! Network key-value tier with native per-key TTL and pattern deletion.
//! Backends are selected from `[l2] backend`, dispatched through an enum
//! and wrapped with per-operation timeouts and a circuit breaker.

pub mod errors;
pub mod provider;
pub mod providers;
pub mod traits;

pub use errors::{DistributedStoreError, StoreResult};
pub use provider::DistributedStoreProvider;
pub use providers::{MemoryStore, NoOpStore};
pub use traits::{DistributedStore, StoredValue};

#[cfg(feature = "cache-redis")]
pub use providers::RedisStore;
