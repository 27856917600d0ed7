use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entities::parse_timestamp;

/// A row in the `files` table.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: String,
    /// Name the file was uploaded under.
    pub file_name: String,
    /// Storage location of the content.
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub thumbnail_path: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FileRecord {
    /// Absolute storage path, independent of the process working directory.
    pub fn absolute_path(&self) -> std::io::Result<PathBuf> {
        std::path::absolute(&self.file_path)
    }

    pub fn size(&self) -> u64 {
        u64::try_from(self.file_size).unwrap_or(0)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FileRow {
    id: String,
    file_name: String,
    file_path: String,
    file_size: i64,
    mime_type: String,
    thumbnail_path: Option<String>,
    uploaded_at: String,
    expires_at: String,
}

pub(crate) const FILE_COLUMNS: &str =
    "id, file_name, file_path, file_size, mime_type, thumbnail_path, uploaded_at, expires_at";

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        FileRecord {
            uploaded_at: parse_timestamp(&row.uploaded_at, "uploaded_at"),
            expires_at: parse_timestamp(&row.expires_at, "expires_at"),
            id: row.id,
            file_name: row.file_name,
            file_path: row.file_path,
            file_size: row.file_size,
            mime_type: row.mime_type,
            thumbnail_path: row.thumbnail_path,
        }
    }
}
