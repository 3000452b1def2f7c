//! Distributed store error types

use crate::error::CacheError;
use thiserror::Error;

/// Failures of the distributed tier.
///
/// The tiered store absorbs these on reads and surfaces them as
/// [`CacheError::StoreUnavailable`] on writes and deletes.
#[derive(Debug, Error)]
pub enum DistributedStoreError {
    /// Failed to connect to the backend
    #[error("Distributed store connection error: {0}")]
    Connection(String),

    /// Operation exceeded its own timeout
    #[error("Distributed store {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Generic backend error
    #[error("Distributed store backend error: {0}")]
    Backend(String),

    /// Circuit breaker is failing fast
    #[error("Distributed store circuit open, {operation} skipped")]
    CircuitOpen { operation: &'static str },
}

/// Result type for distributed store operations
pub type StoreResult<T> = Result<T, DistributedStoreError>;

impl From<DistributedStoreError> for CacheError {
    fn from(e: DistributedStoreError) -> Self {
        CacheError::StoreUnavailable(e.to_string())
    }
}
