//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and a JSON log file,
//! plus canonical log lines for cache operations, invalidations and
//! distributed store failures.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Holds the file writer guard for the life of the process
static LOGGER_INITIALIZED: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Idempotent. `RUST_LOG` overrides the environment's default level. If
/// the `log` directory cannot be created, logs go to the console only.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let log_dir = PathBuf::from("log");
        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("tiercache.{environment}.{pid}.{timestamp}.log");

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(env_filter(&log_level));

        let (file_layer, guard) = match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::never(&log_dir, &log_filename);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                let layer = fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(env_filter(&log_level));
                (Some(layer), Some(guard))
            }
            Err(_) => (None, None),
        };

        // A host application may already own the global subscriber
        if tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = guard.as_ref().map(|_| log_dir.join(&log_filename).display().to_string()),
            "🔧 STRUCTURED LOGGING: Initialized"
        );

        guard
    });
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("TIERCACHE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log one cache-aside call outcome
pub fn log_cache_operation(
    operation: &str,
    data_type: &str,
    resource_id: &str,
    source: Option<&str>,
    hit: bool,
    duration_ms: u64,
) {
    tracing::debug!(
        operation = %operation,
        data_type = %data_type,
        resource_id = %resource_id,
        source = source,
        hit = hit,
        duration_ms = duration_ms,
        "🗄️ CACHE_OPERATION"
    );
}

/// Log a completed invalidation with its aggregate count
pub fn log_invalidation(
    resource_type: &str,
    tenant_id: &str,
    resource_id: &str,
    cascade: bool,
    total_deleted: u64,
    duration_ms: u64,
) {
    tracing::info!(
        resource_type = %resource_type,
        tenant_id = %tenant_id,
        resource_id = %resource_id,
        cascade = cascade,
        total_deleted = total_deleted,
        duration_ms = duration_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "🧹 CACHE_INVALIDATION"
    );
}

/// Log a distributed store failure.
///
/// Degraded reads are warnings (served as a miss); failed writes and
/// deletes are errors, since the caller's data may now be stale.
pub fn log_store_failure(operation: &str, target: &str, error: &str, degraded: bool) {
    if degraded {
        tracing::warn!(
            operation = %operation,
            target_key = %target,
            error = %error,
            "⚠️ STORE_DEGRADED: serving as cache miss"
        );
    } else {
        tracing::error!(
            operation = %operation,
            target_key = %target,
            error = %error,
            timestamp = %Utc::now().to_rfc3339(),
            "❌ STORE_FAILURE"
        );
    }
}
