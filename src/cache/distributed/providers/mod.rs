//! Distributed store provider implementations

pub mod memory;
pub mod noop;

#[cfg(feature = "cache-redis")]
pub mod redis;

pub use memory::MemoryStore;
pub use noop::NoOpStore;

#[cfg(feature = "cache-redis")]
pub use self::redis::RedisStore;
