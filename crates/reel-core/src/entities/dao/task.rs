use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entities::parse_timestamp;

/// Task lifecycle: `pending → processing → completed | failed`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A row in the `tasks` table plus its file associations.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub command: String,
    pub status: TaskStatus,
    /// Set only once the task is completed and wrote at least one file.
    pub result_path: Option<String>,
    /// Set only when the task failed.
    pub error: Option<String>,
    pub preview_path: Option<String>,
    pub preview_generated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub file_ids: Vec<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub(crate) id: String,
    command: String,
    status: String,
    result_path: Option<String>,
    error: Option<String>,
    preview_path: Option<String>,
    preview_generated: bool,
    created_at: String,
    updated_at: String,
    expires_at: String,
}

pub(crate) const TASK_COLUMNS: &str = "id, command, status, result_path, error, preview_path, \
     preview_generated, created_at, updated_at, expires_at";

impl TaskRow {
    pub(crate) fn into_record(self, file_ids: Vec<String>) -> TaskRecord {
        let status = self.status.parse().unwrap_or_else(|_| {
            tracing::warn!(task_id = %self.id, raw = %self.status, "unknown stored task status");
            TaskStatus::Failed
        });
        TaskRecord {
            status,
            created_at: parse_timestamp(&self.created_at, "created_at"),
            updated_at: parse_timestamp(&self.updated_at, "updated_at"),
            expires_at: parse_timestamp(&self.expires_at, "expires_at"),
            id: self.id,
            command: self.command,
            result_path: self.result_path,
            error: self.error,
            preview_path: self.preview_path,
            preview_generated: self.preview_generated,
            file_ids,
        }
    }
}

/// One page of the descending-id task walk.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<TaskRecord>,
    /// Id of the last returned task when more rows exist.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Outcome of startup recovery.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Rows moved from `processing` to `failed`.
    pub interrupted: u64,
    /// Ids still `pending`, oldest first, to be re-enqueued.
    pub pending: Vec<String>,
}
