//! Account definitions
//!
//! Each account lives in its own file inside the accounts directory, either
//! TOML or JSON:
//!
//! ```toml
//! name = "tech-news"
//! feeds = ["https://example.com/feed.xml"]
//! delay_secs = 45
//! post_format = "title_and_link"
//!
//! [credentials]
//! instance = "https://mastodon.social"
//! access_token = "..."
//! ```
//!
//! A file that cannot be read, parsed or validated is skipped with a logged
//! reason. The run only fails when no file yields a usable account.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};

/// How an entry is turned into post text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostFormat {
    /// Title on the first line, link on the second
    #[default]
    TitleAndLink,
    LinkOnly,
}

/// Credentials for a Mastodon-compatible instance
#[derive(Debug)]
pub struct Credentials {
    pub instance: String,
    pub access_token: SecretString,
}

impl Credentials {
    /// Instance URL with an `https://` scheme when none was given
    pub fn instance_url(&self) -> String {
        if self.instance.starts_with("http://") || self.instance.starts_with("https://") {
            self.instance.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.instance.trim_end_matches('/'))
        }
    }

    pub fn token(&self) -> &str {
        self.access_token.expose_secret()
    }
}

/// A destination account and the feeds it republishes
#[derive(Debug)]
pub struct Account {
    pub name: String,
    pub credentials: Credentials,
    pub feeds: Vec<String>,
    pub delay: Duration,
    pub post_format: PostFormat,
}

#[derive(Debug, Deserialize)]
struct AccountFile {
    name: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    feeds: Vec<String>,
    delay_secs: Option<u64>,
    #[serde(default)]
    post_format: PostFormat,
    credentials: Option<CredentialsFile>,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    instance: Option<String>,
    access_token: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Validate account name format
///
/// Rules:
/// - Alphanumeric characters, hyphens, and underscores only
/// - Maximum 64 characters
/// - Cannot be empty
pub fn validate_account_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ConfigError::MissingField("name".to_string()).into());
    }

    if name.len() > 64 {
        return Err(ConfigError::InvalidValue {
            field: "name".to_string(),
            reason: format!("too long: {} characters (max 64)", name.len()),
        }
        .into());
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::InvalidValue {
            field: "name".to_string(),
            reason: format!(
                "'{}' must be alphanumeric with hyphens/underscores only",
                name
            ),
        }
        .into());
    }

    Ok(())
}

impl Account {
    /// Parse and validate a single definition file
    ///
    /// Returns `Ok(None)` for a well-formed file with `enabled = false`.
    pub fn from_file(path: &Path, default_delay: Duration) -> Result<Option<Self>> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;

        let raw: AccountFile = match extension(path).as_deref() {
            Some("json") => serde_json::from_str(&content).map_err(ConfigError::JsonError)?,
            _ => toml::from_str(&content).map_err(ConfigError::ParseError)?,
        };

        if !raw.enabled {
            return Ok(None);
        }

        Self::from_raw(raw, default_delay).map(Some)
    }

    fn from_raw(raw: AccountFile, default_delay: Duration) -> Result<Self> {
        let name = raw
            .name
            .map(|n| n.trim().to_string())
            .ok_or_else(|| ConfigError::MissingField("name".to_string()))?;
        validate_account_name(&name)?;

        if raw.feeds.is_empty() {
            return Err(ConfigError::MissingField("feeds".to_string()).into());
        }

        let mut feeds = Vec::with_capacity(raw.feeds.len());
        for (i, feed) in raw.feeds.into_iter().enumerate() {
            let feed = feed.trim().to_string();
            match reqwest::Url::parse(&feed) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => feeds.push(feed),
                Ok(url) => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("feeds[{}]", i),
                        reason: format!("unsupported scheme '{}'", url.scheme()),
                    }
                    .into())
                }
                Err(e) => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("feeds[{}]", i),
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }

        let credentials = raw
            .credentials
            .ok_or_else(|| ConfigError::MissingField("credentials".to_string()))?;
        let instance = non_empty(credentials.instance)
            .ok_or_else(|| ConfigError::MissingField("credentials.instance".to_string()))?;
        let access_token = non_empty(credentials.access_token)
            .ok_or_else(|| ConfigError::MissingField("credentials.access_token".to_string()))?;

        Ok(Self {
            name,
            credentials: Credentials {
                instance,
                access_token: SecretString::from(access_token),
            },
            feeds,
            delay: raw
                .delay_secs
                .map(Duration::from_secs)
                .unwrap_or(default_delay),
            post_format: raw.post_format,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Load every usable account definition from a directory
///
/// Files are visited in name order so runs are reproducible. Invalid files,
/// disabled accounts and duplicate names are skipped. An empty result is a
/// fatal configuration error.
pub fn load_accounts(dir: &Path, default_delay: Duration) -> Result<Vec<Account>> {
    let entries = std::fs::read_dir(dir).map_err(ConfigError::ReadError)?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| matches!(extension(path).as_deref(), Some("toml") | Some("json")))
        .collect();
    paths.sort();

    let mut accounts: Vec<Account> = Vec::new();
    let mut seen = HashSet::new();

    for path in paths {
        match Account::from_file(&path, default_delay) {
            Ok(Some(account)) => {
                if !seen.insert(account.name.clone()) {
                    warn!(
                        "Skipping {}: account '{}' is already defined",
                        path.display(),
                        account.name
                    );
                    continue;
                }
                debug!(
                    "Loaded account '{}' with {} feed(s) from {}",
                    account.name,
                    account.feeds.len(),
                    path.display()
                );
                accounts.push(account);
            }
            Ok(None) => info!("Skipping {}: account is disabled", path.display()),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    if accounts.is_empty() {
        return Err(ConfigError::NoAccounts(dir.display().to_string()).into());
    }

    info!("Loaded {} account(s) from {}", accounts.len(), dir.display());
    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedcastError;
    use tempfile::TempDir;

    const DELAY: Duration = Duration::from_secs(30);

    fn write(dir: &Path, file: &str, content: &str) {
        std::fs::write(dir.join(file), content).unwrap();
    }

    const VALID_TOML: &str = r#"
name = "tech-news"
feeds = ["https://example.com/feed.xml", "https://example.org/atom.xml"]

[credentials]
instance = "mastodon.social"
access_token = "secret-token"
"#;

    #[test]
    fn test_load_valid_toml_account() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "tech.toml", VALID_TOML);

        let accounts = load_accounts(temp_dir.path(), DELAY).unwrap();
        assert_eq!(accounts.len(), 1);

        let account = &accounts[0];
        assert_eq!(account.name, "tech-news");
        assert_eq!(account.feeds.len(), 2);
        assert_eq!(account.delay, DELAY);
        assert_eq!(account.post_format, PostFormat::TitleAndLink);
        assert_eq!(account.credentials.instance_url(), "https://mastodon.social");
        assert_eq!(account.credentials.token(), "secret-token");
    }

    #[test]
    fn test_load_valid_json_account() {
        let temp_dir = TempDir::new().unwrap();
        write(
            temp_dir.path(),
            "links.json",
            r#"{
                "name": "links_only",
                "feeds": ["http://example.com/rss"],
                "delay_secs": 0,
                "post_format": "link_only",
                "credentials": {"instance": "https://fosstodon.org/", "access_token": "abc"}
            }"#,
        );

        let accounts = load_accounts(temp_dir.path(), DELAY).unwrap();
        assert_eq!(accounts[0].delay, Duration::ZERO);
        assert_eq!(accounts[0].post_format, PostFormat::LinkOnly);
        assert_eq!(accounts[0].credentials.instance_url(), "https://fosstodon.org");
    }

    #[test]
    fn test_invalid_files_are_skipped_individually() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "a-valid.toml", VALID_TOML);
        write(temp_dir.path(), "b-broken.toml", "name = [");
        write(
            temp_dir.path(),
            "c-no-feeds.toml",
            "name = \"empty\"\n[credentials]\ninstance = \"x\"\naccess_token = \"y\"\n",
        );
        write(
            temp_dir.path(),
            "d-no-token.toml",
            "name = \"tokenless\"\nfeeds = [\"https://example.com/feed\"]\n[credentials]\ninstance = \"x\"\naccess_token = \"  \"\n",
        );
        write(
            temp_dir.path(),
            "e-bad-url.toml",
            "name = \"badurl\"\nfeeds = [\"ftp://example.com/feed\"]\n[credentials]\ninstance = \"x\"\naccess_token = \"y\"\n",
        );
        write(temp_dir.path(), "notes.txt", "ignored");

        let accounts = load_accounts(temp_dir.path(), DELAY).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "tech-news");
    }

    #[test]
    fn test_disabled_and_duplicate_accounts_skipped() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "1.toml", VALID_TOML);
        write(temp_dir.path(), "2.toml", VALID_TOML);
        write(
            temp_dir.path(),
            "3.toml",
            &format!("enabled = false\n{}", VALID_TOML.replace("tech-news", "paused")),
        );

        let accounts = load_accounts(temp_dir.path(), DELAY).unwrap();
        assert_eq!(accounts.len(), 1);
    }

    #[test]
    fn test_zero_valid_accounts_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "broken.toml", "feeds = 3");

        let err = load_accounts(temp_dir.path(), DELAY).unwrap_err();
        assert!(matches!(
            err,
            FeedcastError::Config(ConfigError::NoAccounts(_))
        ));
    }

    #[test]
    fn test_missing_directory_is_read_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_accounts(&temp_dir.path().join("nope"), DELAY).unwrap_err();
        assert!(matches!(
            err,
            FeedcastError::Config(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn test_validate_account_name() {
        assert!(validate_account_name("news_bot-2").is_ok());
        assert!(validate_account_name("").is_err());
        assert!(validate_account_name("has space").is_err());
        assert!(validate_account_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_token_not_exposed_in_debug() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "tech.toml", VALID_TOML);
        let accounts = load_accounts(temp_dir.path(), DELAY).unwrap();

        let debug_output = format!("{:?}", accounts[0]);
        assert!(!debug_output.contains("secret-token"));
    }
}
