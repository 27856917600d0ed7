use std::collections::HashSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

use crate::entities::dao::file::{FileRow, FILE_COLUMNS};
use crate::entities::{timestamp, FileRecord, SqliteStore};

/// Metadata of uploaded files. Content lives on disk; see
/// [`crate::config::StorageLayout`].
pub trait FileStore: Send + Sync + 'static {
    fn insert_file(
        &self,
        record: &FileRecord,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    fn get_file(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<FileRecord>, sqlx::Error>> + Send;

    /// The subset of `ids` that have a row, in one query.
    fn existing_file_ids(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<HashSet<String>, sqlx::Error>> + Send;

    /// Remove the row and every task association to it.
    fn delete_file(&self, id: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn set_thumbnail(
        &self,
        id: &str,
        thumbnail_path: Option<&str>,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn expired_files(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<FileRecord>, sqlx::Error>> + Send;
}

impl FileStore for SqliteStore {
    async fn insert_file(&self, record: &FileRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO files (id, file_name, file_path, file_size, mime_type, thumbnail_path, uploaded_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&record.id)
        .bind(&record.file_name)
        .bind(&record.file_path)
        .bind(record.file_size)
        .bind(&record.mime_type)
        .bind(&record.thumbnail_path)
        .bind(timestamp(record.uploaded_at))
        .bind(timestamp(record.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_file(&self, id: &str) -> Result<Option<FileRecord>, sqlx::Error> {
        let row: Option<FileRow> =
            sqlx::query_as(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(FileRecord::from))
    }

    async fn existing_file_ids(&self, ids: &[String]) -> Result<HashSet<String>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut query: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT id FROM files WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        let rows: Vec<(String,)> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_file(&self, id: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM task_files WHERE file_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM files WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_thumbnail(&self, id: &str, thumbnail_path: Option<&str>) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE files SET thumbnail_path = ?1 WHERE id = ?2")
            .bind(thumbnail_path)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn expired_files(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, sqlx::Error> {
        let rows: Vec<FileRow> = sqlx::query_as(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE expires_at <= ?1 ORDER BY expires_at"
        ))
        .bind(timestamp(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FileRecord::from).collect())
    }
}
