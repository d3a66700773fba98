//! Error types for Feedcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedcastError>;

#[derive(Error, Debug)]
pub enum FeedcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FeedcastError {
    /// Returns the process exit code for an error that ends the run
    ///
    /// Only fatal startup failures reach the top level, so every variant
    /// maps to 1. Partial failures inside a run never produce an error.
    pub fn exit_code(&self) -> i32 {
        match self {
            FeedcastError::Config(_) => 1,
            FeedcastError::Database(_) => 1,
            FeedcastError::Platform(_) => 1,
            FeedcastError::Feed(_) => 1,
            FeedcastError::Logging(_) => 1,
            FeedcastError::InvalidInput(_) => 1,
        }
    }

    /// Borrow the platform error, if this is one
    pub fn as_platform(&self) -> Option<&PlatformError> {
        match self {
            FeedcastError::Platform(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to parse JSON config: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("No valid account definitions found in {0}")]
    NoAccounts(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl PlatformError {
    /// Network hiccups and rate limits may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Network(_) | PlatformError::RateLimit(_))
    }
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Could not parse feed: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
