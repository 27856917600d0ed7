//! Persistence layer.
//!
//! [`TaskStore`] and [`FileStore`] define what the rest of the crate needs
//! from storage; [`SqliteStore`] implements both. Trait methods return
//! `impl Future` so no boxing is involved.

pub mod dao;
pub mod file;
pub mod task;

pub use dao::{FileRecord, RecoveryReport, TaskPage, TaskRecord, TaskStatus};
pub use file::FileStore;
pub use task::TaskStore;

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` is a sqlx SQLite URL such as `"sqlite://reel.db"`.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database on a single long-lived connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        // Resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Fixed-width UTC text, so string order is chronological order.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(raw: &str, field: &'static str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, field, error = %e, "failed to parse stored timestamp; using now");
        Utc::now()
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, Utc};

    use super::{FileRecord, FileStore, SqliteStore};

    pub async fn memory_store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    pub fn file_record(id: &str) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: id.to_owned(),
            file_name: format!("{id}.mp4"),
            file_path: format!("/tmp/{id}"),
            file_size: 1024,
            mime_type: "video/mp4".to_owned(),
            thumbnail_path: None,
            uploaded_at: now,
            expires_at: now + Duration::hours(24),
        }
    }

    pub async fn insert_file(store: &SqliteStore, id: &str) -> FileRecord {
        let record = file_record(id);
        store.insert_file(&record).await.unwrap();
        record
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timestamps_sort_textually() {
        let a = timestamp("2025-01-01T00:00:00.5Z".parse().unwrap());
        let b = timestamp("2025-01-01T00:00:01Z".parse().unwrap());
        assert_eq!(a, "2025-01-01T00:00:00.500Z");
        assert_eq!(b, "2025-01-01T00:00:01.000Z");
        assert!(a < b);
    }

    #[tokio::test]
    async fn migrations_apply_to_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("reel.db").display());
        let store = SqliteStore::connect(&url).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        store.close().await;
    }
}
