//! # Cache Metrics
//!
//! Fire-and-forget telemetry for the cache engine. Components hand
//! [`CacheEvent`]s to a [`MetricsSink`]; recording never blocks and never
//! fails the calling operation.
//!
//! - [`TelemetrySink`]: bounded channel drained by a background worker that
//!   aggregates [`CacheStatistics`] and feeds OpenTelemetry instruments
//! - [`NoOpMetricsSink`]: metrics disabled
//!
//! ## Usage
//!
//! ```rust
//! use tiercache_core::metrics::{CacheEvent, MetricsSink, NoOpMetricsSink};
//!
//! let sink = NoOpMetricsSink;
//! sink.record(CacheEvent::Miss {
//!     data_type: "agent_config".to_string(),
//!     resolved_by: None,
//! });
//! ```

pub mod instruments;
pub mod telemetry;

use crate::cache::CacheSource;
use crate::error::Phase;
use std::fmt::Debug;
use std::time::Duration;

pub use telemetry::{CacheStatistics, TelemetrySink};

/// One observation emitted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A lookup tier answered
    Hit {
        data_type: String,
        source: CacheSource,
        /// Index into the lookup chain of the tier that hit
        tier: usize,
    },

    /// Every lookup tier missed; `resolved_by` names what produced the
    /// value, `None` when nothing did
    Miss {
        data_type: String,
        resolved_by: Option<CacheSource>,
    },

    Latency {
        data_type: String,
        phase: Phase,
        duration: Duration,
    },

    /// Encoded size of a populated entry
    EntrySize { data_type: String, bytes: usize },

    /// Keys of `data_type` removed because `resource_type` changed
    Invalidation {
        resource_type: String,
        data_type: String,
        deleted: u64,
    },

    /// A distributed read failed and was served as a miss
    StoreDegraded {
        operation: &'static str,
        error: String,
    },
}

impl CacheEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "hit",
            CacheEvent::Miss { .. } => "miss",
            CacheEvent::Latency { .. } => "latency",
            CacheEvent::EntrySize { .. } => "entry_size",
            CacheEvent::Invalidation { .. } => "invalidation",
            CacheEvent::StoreDegraded { .. } => "store_degraded",
        }
    }
}

/// Receiver of cache events.
///
/// `record` is synchronous, must return promptly and must not panic. If
/// the transport is unavailable the event is dropped and counted.
pub trait MetricsSink: Send + Sync + Debug {
    fn record(&self, event: CacheEvent);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsSink;

impl MetricsSink for NoOpMetricsSink {
    fn record(&self, _event: CacheEvent) {}
}
