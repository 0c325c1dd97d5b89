//! # Structured Logging Module
//!
//! Environment-aware structured logging that writes to the console and to a
//! JSON log file, for following chunks, workers and retries through a run.

use chrono::Utc;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call many times; only the first call installs anything. An
/// already-installed global subscriber is left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let log_dir = PathBuf::from("log");
        if let Err(error) = std::fs::create_dir_all(&log_dir) {
            eprintln!("bulkops: cannot create log directory {}: {error}", log_dir.display());
            return;
        }

        // File name carries environment, PID and timestamp
        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_path = log_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(true)
                    .with_filter(env_filter(&log_level)),
            )
            .with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(env_filter(&log_level)),
            );

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_path.display(),
            "STRUCTURED LOGGING: Initialized with file output"
        );

        // The writer flushes on drop; keep it for the life of the process
        std::mem::forget(guard);
    });
}

/// `RUST_LOG` wins over the environment-derived default
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("BULKOPS_ENV")
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

/// Log structured data for chunk lifecycle events
pub fn log_chunk_operation(
    operation: &str,
    worker_id: usize,
    chunk: u64,
    records: usize,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        worker_id = worker_id,
        chunk = chunk,
        records = records,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "CHUNK_OPERATION"
    );
}

/// Log structured data for one record outcome
pub fn log_record_operation(
    operation: &str,
    chunk: u64,
    index: usize,
    table: Option<&str>,
    status: &str,
    attempts: u32,
) {
    tracing::debug!(
        operation = %operation,
        chunk = chunk,
        index = index,
        table = table,
        status = %status,
        attempts = attempts,
        "RECORD_OPERATION"
    );
}

/// Log structured data for retry scheduling
pub fn log_retry_operation(
    chunk: u64,
    index: usize,
    table: &str,
    attempt: u32,
    delay: Duration,
    reason: &str,
) {
    tracing::info!(
        chunk = chunk,
        index = index,
        table = %table,
        attempt = attempt,
        delay_ms = duration_millis(delay),
        reason = %reason,
        timestamp = %Utc::now().to_rfc3339(),
        "RETRY_OPERATION"
    );
}

/// Milliseconds for a log field, saturating at `u64::MAX`
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
