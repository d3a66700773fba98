//! Feedcast - republish RSS and Atom feeds to Mastodon accounts
//!
//! This library holds the feed-to-publish pipeline: durable dedup
//! bookkeeping, per-account capability detection, and failure isolation so
//! that one broken feed or account never stops the others.

pub mod accounts;
pub mod capability;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod logging;
pub mod pipeline;
pub mod platforms;
pub mod publisher;
pub mod types;

// Re-export commonly used types
pub use accounts::{Account, PostFormat};
pub use config::Config;
pub use db::{Database, DedupStore, MarkOutcome};
pub use error::{FeedcastError, Result};
pub use feed::{Entry, FeedFetcher};
pub use pipeline::{FeedOutcome, RunContext, RunSummary};
pub use publisher::{PublishOutcome, Publisher};
pub use types::{Capability, PostedRecord};
