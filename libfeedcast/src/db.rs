//! Database operations for Feedcast
//!
//! The store is a single table of `(feed_url, entry_id)` pairs that have been
//! published. Every statement commits on its own: a check and the later mark
//! are never wrapped in one transaction, so a slow or failing store can not
//! hold a publish hostage.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{DbError, Result};
use crate::types::PostedRecord;

/// Result of marking an entry as posted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Recorded,
    /// The pair was already present; nothing was written
    AlreadyPosted,
}

/// Dedup bookkeeping used by the fetcher and the pipeline
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn is_posted(&self, feed_url: &str, entry_id: &str) -> Result<bool>;

    async fn mark_posted(
        &self,
        feed_url: &str,
        entry_id: &str,
        account_name: &str,
    ) -> Result<MarkOutcome>;
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the store at `db_path` and apply the schema
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        // Use mode=rwc to allow creating the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying migrations
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Whether the entry has already been published for this feed
    pub async fn is_posted(&self, feed_url: &str, entry_id: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT COUNT(*) FROM posted_entries
            WHERE feed_url = ? AND entry_id = ?
            "#,
        )
        .bind(feed_url)
        .bind(entry_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.0 > 0)
    }

    /// Record a published entry
    ///
    /// A second call with the same pair is a no-op that logs a warning.
    pub async fn mark_posted(
        &self,
        feed_url: &str,
        entry_id: &str,
        account_name: &str,
    ) -> Result<MarkOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO posted_entries (feed_url, entry_id, account_name, posted_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(feed_url, entry_id) DO NOTHING
            "#,
        )
        .bind(feed_url)
        .bind(entry_id)
        .bind(account_name)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            warn!(
                "Entry {} of {} was already marked as posted",
                entry_id, feed_url
            );
            return Ok(MarkOutcome::AlreadyPosted);
        }

        debug!("Marked entry {} of {} as posted", entry_id, feed_url);
        Ok(MarkOutcome::Recorded)
    }

    /// Number of entries recorded for a feed
    pub async fn posted_count(&self, feed_url: &str) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT COUNT(*) FROM posted_entries WHERE feed_url = ?
            "#,
        )
        .bind(feed_url)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.0)
    }

    /// All records for a feed, newest first
    pub async fn posted_for_feed(&self, feed_url: &str) -> Result<Vec<PostedRecord>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT feed_url, entry_id, account_name, posted_at
            FROM posted_entries
            WHERE feed_url = ?
            ORDER BY posted_at DESC, rowid DESC
            "#,
        )
        .bind(feed_url)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| PostedRecord {
                feed_url: r.get("feed_url"),
                entry_id: r.get("entry_id"),
                account_name: r.get("account_name"),
                posted_at: r.get("posted_at"),
            })
            .collect())
    }

    /// Close the pool, flushing SQLite state to disk
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DedupStore for Database {
    async fn is_posted(&self, feed_url: &str, entry_id: &str) -> Result<bool> {
        Database::is_posted(self, feed_url, entry_id).await
    }

    async fn mark_posted(
        &self,
        feed_url: &str,
        entry_id: &str,
        account_name: &str,
    ) -> Result<MarkOutcome> {
        Database::mark_posted(self, feed_url, entry_id, account_name).await
    }
}
