//! Acquisition cache.
//!
//! SQLite-backed record of what has already been fetched, keyed by
//! identity key. The orchestrator consults it before spawning tasks so a
//! repeated query never re-downloads a book, and writes to it after each
//! successful book fetch. WAL mode keeps concurrent worker writes cheap.

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::record::{BookRecord, IdentityKey};

/// Maximum connections in the pool. Kept low for SQLite since it uses
/// file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Cache-related errors.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Failed to connect to or query the database.
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run cache migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Failed to encode or decode a record snapshot.
    #[error("failed to (de)serialize record snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// A previously acquired record.
#[derive(Debug, Clone)]
pub struct CachedRecord {
    /// The record as it looked when acquired.
    pub record: BookRecord,
    /// Where the book artifact was written.
    pub book_path: String,
    /// Acquisition timestamp, as stored by SQLite.
    pub acquired_at: String,
}

/// SQLite-backed dedup cache.
#[derive(Debug, Clone)]
pub struct RecordCache {
    pool: SqlitePool,
}

impl RecordCache {
    /// Opens (creating if needed) the cache at `db_path`, enables WAL
    /// mode, and runs pending migrations.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn open(db_path: &Path) -> Result<Self, CacheError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        // WAL mode for concurrent reads while workers write.
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory cache for testing. WAL is skipped since it
    /// provides no benefit without a file.
    #[instrument]
    pub async fn open_in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Looks up a record by identity key.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &IdentityKey) -> Result<Option<CachedRecord>, CacheError> {
        let row = sqlx::query(
            "SELECT snapshot, book_path, acquired_at FROM acquired_records WHERE identity_key = ?",
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let snapshot: String = row.try_get("snapshot")?;
        let record: BookRecord = serde_json::from_str(&snapshot)?;
        Ok(Some(CachedRecord {
            record,
            book_path: row.try_get("book_path")?,
            acquired_at: row.try_get("acquired_at")?,
        }))
    }

    /// Records a successful acquisition. Re-acquiring the same key
    /// replaces the previous row.
    #[instrument(skip(self, record), fields(key = %key))]
    pub async fn put(
        &self,
        key: &IdentityKey,
        record: &BookRecord,
        book_path: &Path,
    ) -> Result<(), CacheError> {
        let snapshot = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO acquired_records (identity_key, snapshot, book_path)
             VALUES (?, ?, ?)
             ON CONFLICT(identity_key) DO UPDATE SET
                 snapshot = excluded.snapshot,
                 book_path = excluded.book_path,
                 acquired_at = datetime('now')",
        )
        .bind(key.to_string())
        .bind(snapshot)
        .bind(book_path.display().to_string())
        .execute(&self.pool)
        .await?;
        debug!("acquisition recorded");
        Ok(())
    }

    /// Number of cached acquisitions.
    pub async fn len(&self) -> Result<u64, CacheError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM acquired_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Gracefully closes the pool.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::SourceId;

    fn record() -> BookRecord {
        let mut record = BookRecord::fragment(
            "Clean Code",
            vec!["Robert C. Martin".to_string()],
            SourceId::Archive,
        );
        record.isbn13 = Some("9780132350884".to_string());
        record
    }

    // ==================== Round Trip Tests ====================

    #[tokio::test]
    async fn test_get_on_empty_cache() {
        let cache = RecordCache::open_in_memory().await.unwrap();
        let key = record().identity_key();
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = RecordCache::open_in_memory().await.unwrap();
        let record = record();
        let key = record.identity_key();

        cache
            .put(&key, &record, Path::new("books/clean-code.pdf"))
            .await
            .unwrap();

        let cached = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(cached.record, record);
        assert_eq!(cached.book_path, "books/clean-code.pdf");
        assert!(!cached.acquired_at.is_empty());
    }

    #[tokio::test]
    async fn test_put_replaces_existing_row() {
        let cache = RecordCache::open_in_memory().await.unwrap();
        let record = record();
        let key = record.identity_key();

        cache.put(&key, &record, Path::new("a.pdf")).await.unwrap();
        cache.put(&key, &record, Path::new("b.pdf")).await.unwrap();

        assert_eq!(cache.len().await.unwrap(), 1);
        let cached = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(cached.book_path, "b.pdf");
    }

    #[tokio::test]
    async fn test_open_with_tempfile_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RecordCache::open(&dir.path().join("cache.db")).await.unwrap();

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&cache.pool)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");
    }
}
