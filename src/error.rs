//! Structured error handling for the cache engine.
//!
//! Not-found is never an error: the orchestrator reports it as an empty
//! [`LoadOutcome`](crate::cache::LoadOutcome). Everything below is a real
//! failure the caller has to see.

use std::fmt;
use thiserror::Error;

/// Phase of a cache-aside call, used to label source failures, timeouts
/// and cancellations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Lookup,
    Fetch,
    Generate,
    Populate,
    Embed,
    Invalidate,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lookup => "lookup",
            Phase::Fetch => "fetch",
            Phase::Generate => "generate",
            Phase::Populate => "populate",
            Phase::Embed => "embed",
            Phase::Invalidate => "invalidate",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// Malformed cache key (empty tenant or resource, reserved tenant)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Encode/decode failure on a stored value
    #[error("Serialization error for data type '{data_type}': {message}")]
    Serialization { data_type: String, message: String },

    /// Distributed tier unreachable, timed out or circuit open.
    ///
    /// Read paths never return this; they degrade to a miss.
    #[error("Distributed store unavailable: {0}")]
    StoreUnavailable(String),

    /// The fetch/generate/embed collaborator failed
    #[error("Source error during {phase}: {message}")]
    Source { phase: Phase, message: String },

    #[error("Operation timed out during {phase} after {elapsed_ms}ms")]
    Timeout { phase: Phase, elapsed_ms: u64 },

    #[error("Operation cancelled during {phase}")]
    Cancelled { phase: Phase },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    pub fn serialization(data_type: impl Into<String>, message: impl fmt::Display) -> Self {
        CacheError::Serialization {
            data_type: data_type.into(),
            message: message.to_string(),
        }
    }

    /// Wrap a collaborator failure, keeping the whole `anyhow` context chain
    pub fn source(phase: Phase, error: anyhow::Error) -> Self {
        CacheError::Source {
            phase,
            message: format!("{error:#}"),
        }
    }

    /// True for failures caused by the distributed tier
    pub fn is_store_failure(&self) -> bool {
        matches!(self, CacheError::StoreUnavailable(_))
    }
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_keeps_context_chain() {
        let err = anyhow::anyhow!("connection reset").context("loading agent a1");
        let cache_err = CacheError::source(Phase::Fetch, err);
        let rendered = cache_err.to_string();
        assert!(rendered.contains("fetch"));
        assert!(rendered.contains("loading agent a1"));
        assert!(rendered.contains("connection reset"));
    }

    #[test]
    fn test_store_failure_classification() {
        assert!(CacheError::StoreUnavailable("down".into()).is_store_failure());
        assert!(!CacheError::Validation("empty".into()).is_store_failure());
    }

    #[test]
    fn test_phase_labels() {
        let labels: Vec<&str> = [
            Phase::Lookup,
            Phase::Fetch,
            Phase::Generate,
            Phase::Populate,
            Phase::Embed,
            Phase::Invalidate,
        ]
        .iter()
        .map(Phase::as_str)
        .collect();
        assert_eq!(
            labels,
            ["lookup", "fetch", "generate", "populate", "embed", "invalidate"]
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = CacheError::Timeout {
            phase: Phase::Generate,
            elapsed_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "Operation timed out during generate after 1500ms"
        );
    }
}
