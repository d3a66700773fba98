//! Per-run logging setup
//!
//! Every run writes its own file, `feedcast_YYYYmmdd_HHMMSS.log`, in the
//! log directory at debug level. Older run logs beyond the retention count
//! are removed when a new one is opened. With `verbose`, info and above is
//! mirrored to stdout. `RUST_LOG` replaces the file filter when set.
//!
//! # Examples
//!
//! ```no_run
//! use libfeedcast::logging::{LogFormat, LoggingConfig};
//!
//! # fn example() -> libfeedcast::Result<()> {
//! let config = LoggingConfig::new("logs".into(), LogFormat::Text, true);
//! let log_file = config.init()?;
//! println!("Logging to {}", log_file.display());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Local};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::DEFAULT_LOG_RETENTION;
use crate::error::{FeedcastError, Result};

const LOG_PREFIX: &str = "feedcast_";
const LOG_SUFFIX: &str = ".log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub format: LogFormat,
    /// Mirror info-and-above to stdout
    pub verbose: bool,
    /// Run logs kept in `log_dir`, including the new one
    pub retention: usize,
}

impl LoggingConfig {
    pub fn new(log_dir: PathBuf, format: LogFormat, verbose: bool) -> Self {
        Self {
            log_dir,
            format,
            verbose,
            retention: DEFAULT_LOG_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Open this run's log file and install the global subscriber
    ///
    /// Returns the path of the new log file. Call once per process.
    pub fn init(&self) -> Result<PathBuf> {
        let (path, file) = self.open_run_log()?;

        let file_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let writer = Mutex::new(file);
        let file_layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .boxed(),
            LogFormat::Text => fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        };

        let console_layer = self.verbose.then(|| {
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_filter(LevelFilter::INFO)
        });

        tracing_subscriber::registry()
            .with(file_layer.with_filter(file_filter))
            .with(console_layer)
            .try_init()
            .map_err(|e| FeedcastError::Logging(e.to_string()))?;

        // Pruning problems never block the run
        match prune_old_logs(&self.log_dir, self.retention.max(1)) {
            Ok(removed) if !removed.is_empty() => {
                tracing::debug!("Removed {} old run logs", removed.len());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(
                "Could not prune old logs in {}: {}",
                self.log_dir.display(),
                e
            ),
        }

        Ok(path)
    }

    /// Create the log directory and this run's file
    fn open_run_log(&self) -> Result<(PathBuf, File)> {
        std::fs::create_dir_all(&self.log_dir).map_err(|e| {
            FeedcastError::Logging(format!(
                "cannot create log directory {}: {}",
                self.log_dir.display(),
                e
            ))
        })?;

        let path = self.log_dir.join(log_file_name(Local::now()));
        let file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                FeedcastError::Logging(format!("cannot open {}: {}", path.display(), e))
            })?;

        Ok((path, file))
    }
}

/// File name for a run started at `started`
pub fn log_file_name(started: DateTime<Local>) -> String {
    format!(
        "{}{}{}",
        LOG_PREFIX,
        started.format("%Y%m%d_%H%M%S"),
        LOG_SUFFIX
    )
}

/// Delete the oldest run logs so that at most `keep` remain
///
/// Only files named like run logs are considered. The timestamp in the name
/// sorts chronologically. Returns the removed paths.
pub fn prune_old_logs(log_dir: &Path, keep: usize) -> std::io::Result<Vec<PathBuf>> {
    let mut logs: Vec<PathBuf> = std::fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(is_run_log_name)
        })
        .collect();

    if logs.len() <= keep {
        return Ok(Vec::new());
    }

    logs.sort();
    let excess = logs.len() - keep;
    let mut removed = Vec::with_capacity(excess);
    for path in logs.into_iter().take(excess) {
        std::fs::remove_file(&path)?;
        removed.push(path);
    }
    Ok(removed)
}

fn is_run_log_name(name: &str) -> bool {
    let Some(stamp) = name
        .strip_prefix(LOG_PREFIX)
        .and_then(|rest| rest.strip_suffix(LOG_SUFFIX))
    else {
        return false;
    };
    stamp.len() == 15
        && stamp
            .char_indices()
            .all(|(i, c)| if i == 8 { c == '_' } else { c.is_ascii_digit() })
}
