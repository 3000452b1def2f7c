//! # Resilience Module
//!
//! Circuit breaker protection for the distributed cache tier. A slow or
//! unreachable L2 must not add its timeout to every request: once the
//! breaker opens, reads fail fast to a miss (and fall through to the
//! source) while writes and invalidations fail fast with an error.
//!
//! ## Usage
//!
//! ```rust
//! use tiercache_core::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "distributed_store".to_string(),
//!     CircuitBreakerConfig {
//!         failure_threshold: 5,
//!         timeout: Duration::from_secs(30),
//!         success_threshold: 2,
//!     },
//! );
//!
//! if breaker.should_allow() {
//!     // ... perform the guarded call, then record its outcome
//!     breaker.record_success(Duration::from_millis(3));
//! }
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
