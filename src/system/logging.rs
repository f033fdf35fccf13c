//! Logging system initialization
//!
//! This module initializes the tracing subscriber from the `[logging]`
//! section of the static configuration.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;

use crate::config::LoggingConfig;
use crate::errors::{CalibanError, Result};

const DEFAULT_LOG_FILE: &str = "caliban.log";

/// Initialize logging system based on configuration
///
/// Output goes to stdout unless `logging.file` is set. With rotation enabled
/// the file is rolled daily and at most `max_backups` files are kept.
///
/// # Returns
/// * `WorkerGuard` - Must be kept alive for the duration of the program
///   to ensure non-blocking log writes are flushed
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    let log_file = config.file.as_deref().filter(|f| !f.is_empty());

    let writer: Box<dyn std::io::Write + Send + Sync> = match log_file {
        Some(log_file) if config.enable_rotation => {
            let path = Path::new(log_file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let filename = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or(DEFAULT_LOG_FILE);
            let appender = rolling::Builder::new()
                .rotation(rolling::Rotation::DAILY)
                .filename_prefix(filename.trim_end_matches(".log"))
                .filename_suffix("log")
                .max_log_files(config.max_backups.max(1) as usize)
                .build(dir)
                .map_err(|e| {
                    CalibanError::file_operation(format!(
                        "Failed to create rolling log appender in {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
            Box::new(appender)
        }
        Some(log_file) => {
            // Non-rotating, append to file
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
                .map_err(|e| {
                    CalibanError::file_operation(format!(
                        "Failed to open log file {}: {}",
                        log_file, e
                    ))
                })?;
            Box::new(file)
        }
        None => Box::new(std::io::stdout()),
    };

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(writer);
    let filter = tracing_subscriber::EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_env_filter(filter)
        .with_level(true)
        .with_ansi(log_file.is_none());

    let result = if config.format == "json" {
        subscriber_builder.json().try_init()
    } else {
        subscriber_builder.try_init()
    };
    result.map_err(|e| {
        CalibanError::configuration(format!("Failed to install tracing subscriber: {}", e))
    })?;

    Ok(guard)
}
