use reel_core::entities::FileRecord;
use serde::Serialize;
use utoipa::ToSchema;

use super::timestamp;

#[derive(Debug, Serialize, ToSchema)]
pub struct FileResponse {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub has_thumbnail: bool,
    pub uploaded_at: String,
    pub expires_at: String,
}

impl From<FileRecord> for FileResponse {
    fn from(file: FileRecord) -> Self {
        Self {
            file_size: file.size(),
            has_thumbnail: file.thumbnail_path.is_some(),
            uploaded_at: timestamp(&file.uploaded_at),
            expires_at: timestamp(&file.expires_at),
            id: file.id,
            file_name: file.file_name,
            mime_type: file.mime_type,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FileDetailResponse {
    pub success: bool,
    pub file: FileResponse,
}
