//! Run configuration for Feedcast
//!
//! Settings come from an optional TOML file. Every field has a default, so a
//! run with no file at all uses `accounts/`, `feedcast.db` and `logs/` in the
//! working directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

pub const DEFAULT_DELAY_SECS: u64 = 30;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 40 * 1024 * 1024;
pub const DEFAULT_MAX_FEED_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_LOG_RETENTION: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding one definition file per account
    pub accounts_dir: String,
    /// SQLite file recording published entries
    pub database_path: String,
    /// Directory receiving one log file per run
    pub log_dir: String,
    /// Number of run logs kept in `log_dir`
    pub log_retention: usize,
    /// Pacing delay for accounts that do not set their own
    pub default_delay_secs: u64,
    pub fetch_timeout_secs: u64,
    pub max_image_bytes: u64,
    pub max_feed_bytes: u64,
    /// Where images are staged before upload (system temp dir when unset)
    pub staging_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounts_dir: "accounts".to_string(),
            database_path: "feedcast.db".to_string(),
            log_dir: "logs".to_string(),
            log_retention: DEFAULT_LOG_RETENTION,
            default_delay_secs: DEFAULT_DELAY_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_feed_bytes: DEFAULT_MAX_FEED_BYTES,
            staging_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> Result<Self> {
        match resolve_config_path()? {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fetch_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        for (field, value) in [
            ("max_image_bytes", self.max_image_bytes),
            ("max_feed_bytes", self.max_feed_bytes),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn accounts_dir(&self) -> PathBuf {
        expand(&self.accounts_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        expand(&self.database_path)
    }

    pub fn log_dir(&self) -> PathBuf {
        expand(&self.log_dir)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Resolve the configuration file path
///
/// `FEEDCAST_CONFIG` wins when set, even if the file is missing (loading then
/// fails loudly). Otherwise `<config_dir>/feedcast/config.toml` is used only
/// when it exists.
pub fn resolve_config_path() -> Result<Option<PathBuf>> {
    if let Ok(path) = std::env::var("FEEDCAST_CONFIG") {
        return Ok(Some(expand(&path)));
    }

    let config_dir = match dirs::config_dir() {
        Some(dir) => dir,
        None => return Ok(None),
    };

    let candidate = config_dir.join("feedcast").join("config.toml");
    Ok(candidate.exists().then_some(candidate))
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}
