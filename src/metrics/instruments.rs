//! # Cache Instruments
//!
//! OpenTelemetry instruments for the cache engine. Exporter installation
//! belongs to the host process; without one these are no-ops.
//!
//! ## Usage
//!
//! ```rust
//! use tiercache_core::metrics::instruments;
//! use opentelemetry::KeyValue;
//!
//! instruments::cache_hits().add(
//!     1,
//!     &[
//!         KeyValue::new("data_type", "agent_config"),
//!         KeyValue::new("source", "memory"),
//!     ],
//! );
//! ```

use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::sync::OnceLock;

static CACHE_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    CACHE_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("tiercache"))
}

/// Lookups answered by L1 or L2
///
/// Labels:
/// - data_type
/// - source: memory, distributed
pub fn cache_hits() -> Counter<u64> {
    meter()
        .u64_counter("tiercache.cache.hits")
        .with_description("Cache lookups answered by the local or distributed tier")
        .build()
}

/// Lookups that missed every tier
///
/// Labels:
/// - data_type
/// - resolved_by: database, generated, not_found
pub fn cache_misses() -> Counter<u64> {
    meter()
        .u64_counter("tiercache.cache.misses")
        .with_description("Cache lookups that missed every tier")
        .build()
}

/// Per-phase duration in milliseconds
///
/// Labels:
/// - data_type
/// - phase: lookup, fetch, generate, populate, embed, invalidate
pub fn operation_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("tiercache.operation.duration")
        .with_description("Cache operation phase duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Encoded entry size in bytes (only when size estimation is enabled)
///
/// Labels:
/// - data_type
pub fn entry_size() -> Histogram<u64> {
    meter()
        .u64_histogram("tiercache.entry.size")
        .with_description("Encoded cache entry size in bytes")
        .with_unit("By")
        .build()
}

/// Keys removed by invalidation
///
/// Labels:
/// - resource_type: type whose mutation triggered the invalidation
/// - data_type: type whose entries were removed
pub fn invalidated_keys() -> Counter<u64> {
    meter()
        .u64_counter("tiercache.invalidated.keys")
        .with_description("Cache keys removed by invalidation")
        .build()
}

/// Distributed store reads degraded to a miss
///
/// Labels:
/// - operation
pub fn store_degraded() -> Counter<u64> {
    meter()
        .u64_counter("tiercache.store.degraded")
        .with_description("Distributed store reads degraded to a cache miss")
        .build()
}

/// Events dropped because the metrics channel was full or closed
pub fn dropped_events() -> Counter<u64> {
    meter()
        .u64_counter("tiercache.metrics.dropped")
        .with_description("Metric events dropped by the cache telemetry sink")
        .build()
}

/// Instrument handles built once per sink
#[derive(Clone)]
pub(crate) struct CacheInstruments {
    pub hits: Counter<u64>,
    pub misses: Counter<u64>,
    pub duration: Histogram<f64>,
    pub entry_size: Histogram<u64>,
    pub invalidated: Counter<u64>,
    pub degraded: Counter<u64>,
    pub dropped: Counter<u64>,
}

impl CacheInstruments {
    pub fn new() -> Self {
        Self {
            hits: cache_hits(),
            misses: cache_misses(),
            duration: operation_duration(),
            entry_size: entry_size(),
            invalidated: invalidated_keys(),
            degraded: store_degraded(),
            dropped: dropped_events(),
        }
    }
}
