use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::dao::task::{TaskRow, TASK_COLUMNS};
use crate::entities::{timestamp, RecoveryReport, SqliteStore, TaskPage, TaskRecord, TaskStatus};

/// Error recorded on tasks that were running when the previous process died.
pub const INTERRUPTED_ERROR: &str = "interrupted by server restart";

/// Persistence of tasks and their file associations.
///
/// Status transitions are guarded in SQL: each one names the state it may
/// leave and reports whether a row actually changed. A task that reached
/// `completed` or `failed` is never rewritten.
pub trait TaskStore: Send + Sync + 'static {
    /// Insert a new `pending` task linked to `file_ids` (duplicates collapse).
    fn create_task(
        &self,
        command: &str,
        file_ids: &[String],
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<TaskRecord, sqlx::Error>> + Send;

    fn get_task(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<TaskRecord>, sqlx::Error>> + Send;

    /// Descending-id keyset page: rows with `id < cursor`, at most `limit`.
    fn list_tasks(
        &self,
        limit: u32,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<TaskPage, sqlx::Error>> + Send;

    fn task_file_ids(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Vec<String>, sqlx::Error>> + Send;

    fn mark_processing(&self, id: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn mark_completed(
        &self,
        id: &str,
        result_path: Option<&str>,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn mark_failed(
        &self,
        id: &str,
        error: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Record the preview outcome on a completed task.
    fn set_preview(
        &self,
        id: &str,
        preview_path: Option<&str>,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Remove associations and the task row as one unit.
    fn delete_task(&self, id: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Tasks past expiry that no longer reference any file. Running tasks are
    /// left alone.
    fn expired_orphan_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<TaskRecord>, sqlx::Error>> + Send;

    /// Fail tasks left `processing` by a previous process and report the ids
    /// still `pending`.
    fn recover_interrupted(
        &self,
    ) -> impl Future<Output = Result<RecoveryReport, sqlx::Error>> + Send;
}

impl TaskStore for SqliteStore {
    async fn create_task(
        &self,
        command: &str,
        file_ids: &[String],
        expires_at: DateTime<Utc>,
    ) -> Result<TaskRecord, sqlx::Error> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now();
        let created_at = timestamp(now);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO tasks (id, command, status, created_at, updated_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
        )
        .bind(&id)
        .bind(command)
        .bind(TaskStatus::Pending.as_ref())
        .bind(&created_at)
        .bind(timestamp(expires_at))
        .execute(&mut *tx)
        .await?;

        let mut linked: Vec<String> = Vec::with_capacity(file_ids.len());
        for file_id in file_ids {
            if linked.contains(file_id) {
                continue;
            }
            sqlx::query("INSERT OR IGNORE INTO task_files (task_id, file_id) VALUES (?1, ?2)")
                .bind(&id)
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            linked.push(file_id.clone());
        }
        tx.commit().await?;

        Ok(TaskRecord {
            id,
            command: command.to_owned(),
            status: TaskStatus::Pending,
            result_path: None,
            error: None,
            preview_path: None,
            preview_generated: false,
            created_at: now,
            updated_at: now,
            expires_at,
            file_ids: linked,
        })
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, sqlx::Error> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(row) => {
                let file_ids = self.task_file_ids(id).await?;
                Ok(Some(row.into_record(file_ids)))
            }
            None => Ok(None),
        }
    }

    async fn list_tasks(&self, limit: u32, cursor: Option<&str>) -> Result<TaskPage, sqlx::Error> {
        let mut rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE (?1 IS NULL OR id < ?1) ORDER BY id DESC LIMIT ?2"
        ))
        .bind(cursor)
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let file_ids = self.task_file_ids(&row.id).await?;
            tasks.push(row.into_record(file_ids));
        }
        let next_cursor = if has_more {
            tasks.last().map(|t| t.id.clone())
        } else {
            None
        };

        Ok(TaskPage {
            tasks,
            next_cursor,
            has_more,
        })
    }

    async fn task_file_ids(&self, id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT file_id FROM task_files WHERE task_id = ?1 ORDER BY rowid")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(file_id,)| file_id).collect())
    }

    async fn mark_processing(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'processing', updated_at = ?1 \
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(&self, id: &str, result_path: Option<&str>) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'completed', result_path = ?1, error = NULL, updated_at = ?2 \
             WHERE id = ?3 AND status = 'processing'",
        )
        .bind(result_path)
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'failed', error = ?1, result_path = NULL, updated_at = ?2 \
             WHERE id = ?3 AND status IN ('pending', 'processing')",
        )
        .bind(error)
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_preview(&self, id: &str, preview_path: Option<&str>) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET preview_path = ?1, preview_generated = 1, updated_at = ?2 \
             WHERE id = ?3 AND status = 'completed'",
        )
        .bind(preview_path)
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_task(&self, id: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM task_files WHERE task_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn expired_orphan_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>, sqlx::Error> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks t \
             WHERE t.expires_at <= ?1 AND t.status <> 'processing' \
               AND NOT EXISTS (SELECT 1 FROM task_files tf WHERE tf.task_id = t.id) \
             ORDER BY t.id"
        ))
        .bind(timestamp(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.into_record(Vec::new())).collect())
    }

    async fn recover_interrupted(&self) -> Result<RecoveryReport, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let interrupted = sqlx::query(
            "UPDATE tasks SET status = 'failed', error = ?1, updated_at = ?2 \
             WHERE status = 'processing'",
        )
        .bind(INTERRUPTED_ERROR)
        .bind(timestamp(Utc::now()))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let pending: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM tasks WHERE status = 'pending' ORDER BY id")
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;

        Ok(RecoveryReport {
            interrupted,
            pending: pending.into_iter().map(|(id,)| id).collect(),
        })
    }
}
