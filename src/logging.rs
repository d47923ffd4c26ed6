//! Logging Setup
//!
//! Console logging to stderr (stdout stays free for progress output) and, in
//! debug mode, a daily-rolling log file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

const LOG_FILE_PREFIX: &str = "wacrm.log";

#[derive(Debug, Clone)]
pub struct LogConfig {
    debug_mode: bool,
    level: String,
    json: bool,
    log_dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            debug_mode: false,
            level: "info".to_string(),
            json: false,
            log_dir: default_log_dir(),
        }
    }

    /// Debug mode forces `debug` level and enables the log file
    pub fn with_debug_mode(mut self, debug: bool) -> Self {
        self.debug_mode = debug;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Write the log file as JSON lines
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = dir;
        self
    }

    fn effective_level(&self) -> &str {
        if self.debug_mode { "debug" } else { &self.level }
    }
}

/// `~/.local/share/wacrm/logs` (platform data dir)
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wacrm")
        .join("logs")
}

/// Install the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.effective_level()));

    let (file_layer, guard) = if config.debug_mode {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("Failed to create log directory: {:?}", config.log_dir))?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
            fmt::layer().json().with_writer(writer).boxed()
        } else {
            fmt::layer().with_ansi(false).with_writer(writer).boxed()
        };
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if config.debug_mode {
        tracing::debug!("Debug logging to {}", config.log_dir.display());
    }
    Ok(guard)
}

fn log_files(dir: &Path) -> Vec<(PathBuf, std::fs::Metadata)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            metadata.is_file().then(|| (entry.path(), metadata))
        })
        .collect()
}

/// Most recently modified log file in `dir`
pub fn latest_log_file(dir: &Path) -> Option<PathBuf> {
    log_files(dir)
        .into_iter()
        .max_by_key(|(_, metadata)| metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH))
        .map(|(path, _)| path)
}

/// Count and total size of the log files in `dir`
pub fn log_stats(dir: &Path) -> (usize, u64) {
    let files = log_files(dir);
    let size = files.iter().map(|(_, metadata)| metadata.len()).sum();
    (files.len(), size)
}

/// Remove log files in `dir` older than `days`.
pub fn cleanup_old_logs(dir: &Path, days: u64) -> Result<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(days * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for (path, metadata) in log_files(dir) {
        let modified = metadata.modified().unwrap_or(SystemTime::now());
        if modified < cutoff {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove log file: {:?}", path))?;
            removed += 1;
        }
    }
    Ok(removed)
}
