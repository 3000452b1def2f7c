//! # Telemetry Sink
//!
//! Bounded-channel [`MetricsSink`]. `record` is a `try_send`; a background
//! worker drains the channel, aggregates [`CacheStatistics`] and records
//! OpenTelemetry instruments. A full or closed channel drops the event and
//! bumps a local counter.

use super::instruments::CacheInstruments;
use super::{CacheEvent, MetricsSink};
use crate::cache::CacheSource;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

enum Envelope {
    Event(CacheEvent),
    /// Acknowledged once every earlier event has been applied
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct StatsCollector {
    memory_hits: AtomicU64,
    distributed_hits: AtomicU64,
    misses: AtomicU64,
    database_loads: AtomicU64,
    generated: AtomicU64,
    not_found: AtomicU64,
    invalidated_keys: AtomicU64,
    store_degraded: AtomicU64,
    entries_measured: AtomicU64,
    entry_bytes_total: AtomicU64,
    dropped_events: AtomicU64,
}

/// Aggregated counters since the sink started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    pub memory_hits: u64,
    pub distributed_hits: u64,
    pub misses: u64,
    pub database_loads: u64,
    pub generated: u64,
    pub not_found: u64,
    pub invalidated_keys: u64,
    pub store_degraded: u64,
    pub entries_measured: u64,
    pub entry_bytes_total: u64,
    pub dropped_events: u64,
}

impl CacheStatistics {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.distributed_hits
    }

    /// 0.0 to 1.0; 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits() + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits() as f64 / lookups as f64
        }
    }
}

pub struct TelemetrySink {
    sender: mpsc::Sender<Envelope>,
    stats: Arc<StatsCollector>,
    instruments: CacheInstruments,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TelemetrySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySink")
            .field("capacity", &self.sender.max_capacity())
            .field("stats", &self.statistics())
            .finish()
    }
}

impl TelemetrySink {
    /// Start the sink and its worker; the worker exits when `shutdown` is
    /// cancelled, after applying what is already queued.
    pub fn spawn(capacity: usize, shutdown: CancellationToken) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(StatsCollector::default());
        let instruments = CacheInstruments::new();

        let worker = tokio::spawn(run_worker(
            receiver,
            Arc::clone(&stats),
            instruments.clone(),
            shutdown,
        ));

        info!(capacity = capacity, "Cache telemetry sink started");

        Arc::new(Self {
            sender,
            stats,
            instruments,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn statistics(&self) -> CacheStatistics {
        let s = &self.stats;
        CacheStatistics {
            memory_hits: s.memory_hits.load(Ordering::Relaxed),
            distributed_hits: s.distributed_hits.load(Ordering::Relaxed),
            misses: s.misses.load(Ordering::Relaxed),
            database_loads: s.database_loads.load(Ordering::Relaxed),
            generated: s.generated.load(Ordering::Relaxed),
            not_found: s.not_found.load(Ordering::Relaxed),
            invalidated_keys: s.invalidated_keys.load(Ordering::Relaxed),
            store_degraded: s.store_degraded.load(Ordering::Relaxed),
            entries_measured: s.entries_measured.load(Ordering::Relaxed),
            entry_bytes_total: s.entry_bytes_total.load(Ordering::Relaxed),
            dropped_events: s.dropped_events.load(Ordering::Relaxed),
        }
    }

    /// Wait until every event recorded before this call has been applied.
    /// Returns immediately if the worker has stopped.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Envelope::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Wait for the worker to exit after its shutdown token was cancelled
    pub async fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl MetricsSink for TelemetrySink {
    fn record(&self, event: CacheEvent) {
        if let Err(err) = self.sender.try_send(Envelope::Event(event)) {
            let reason = match &err {
                TrySendError::Full(_) => "channel_full",
                TrySendError::Closed(_) => "channel_closed",
            };
            let kind = match err.into_inner() {
                Envelope::Event(event) => event.kind(),
                Envelope::Flush(_) => "flush",
            };

            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
            self.instruments.dropped.add(
                1,
                &[KeyValue::new("kind", kind), KeyValue::new("reason", reason)],
            );
            debug!(kind = kind, reason = reason, "Cache metric event dropped");
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<Envelope>,
    stats: Arc<StatsCollector>,
    instruments: CacheInstruments,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            message = receiver.recv() => match message {
                Some(message) => handle(message, &stats, &instruments),
                None => break,
            },
            _ = shutdown.cancelled() => {
                receiver.close();
                while let Ok(message) = receiver.try_recv() {
                    handle(message, &stats, &instruments);
                }
                break;
            }
        }
    }
    debug!("Cache telemetry worker stopped");
}

fn handle(message: Envelope, stats: &StatsCollector, instruments: &CacheInstruments) {
    match message {
        Envelope::Event(event) => apply(event, stats, instruments),
        Envelope::Flush(ack) => {
            let _ = ack.send(());
        }
    }
}

fn source_label(source: Option<CacheSource>) -> &'static str {
    source.map(|s| s.as_str()).unwrap_or("not_found")
}

fn apply(event: CacheEvent, stats: &StatsCollector, instruments: &CacheInstruments) {
    match event {
        CacheEvent::Hit {
            data_type, source, ..
        } => {
            match source {
                CacheSource::Memory => &stats.memory_hits,
                _ => &stats.distributed_hits,
            }
            .fetch_add(1, Ordering::Relaxed);
            instruments.hits.add(
                1,
                &[
                    KeyValue::new("data_type", data_type),
                    KeyValue::new("source", source.as_str()),
                ],
            );
        }
        CacheEvent::Miss {
            data_type,
            resolved_by,
        } => {
            stats.misses.fetch_add(1, Ordering::Relaxed);
            match resolved_by {
                Some(CacheSource::Database) => &stats.database_loads,
                Some(CacheSource::Generated) => &stats.generated,
                _ => &stats.not_found,
            }
            .fetch_add(1, Ordering::Relaxed);
            instruments.misses.add(
                1,
                &[
                    KeyValue::new("data_type", data_type),
                    KeyValue::new("resolved_by", source_label(resolved_by)),
                ],
            );
        }
        CacheEvent::Latency {
            data_type,
            phase,
            duration,
        } => {
            instruments.duration.record(
                duration.as_secs_f64() * 1_000.0,
                &[
                    KeyValue::new("data_type", data_type),
                    KeyValue::new("phase", phase.as_str()),
                ],
            );
        }
        CacheEvent::EntrySize { data_type, bytes } => {
            stats.entries_measured.fetch_add(1, Ordering::Relaxed);
            stats
                .entry_bytes_total
                .fetch_add(bytes as u64, Ordering::Relaxed);
            instruments
                .entry_size
                .record(bytes as u64, &[KeyValue::new("data_type", data_type)]);
        }
        CacheEvent::Invalidation {
            resource_type,
            data_type,
            deleted,
        } => {
            stats
                .invalidated_keys
                .fetch_add(deleted, Ordering::Relaxed);
            instruments.invalidated.add(
                deleted,
                &[
                    KeyValue::new("resource_type", resource_type),
                    KeyValue::new("data_type", data_type),
                ],
            );
        }
        CacheEvent::StoreDegraded { operation, .. } => {
            stats.store_degraded.fetch_add(1, Ordering::Relaxed);
            instruments
                .degraded
                .add(1, &[KeyValue::new("operation", operation)]);
        }
    }
}
