use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reel_core::commands::{CommandInput, CommandKind};
use reel_core::entities::{TaskPage, TaskRecord};
use reel_core::service::{OutputFile, PreviewInfo, SubmittedTask, TaskStatusView};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::timestamp;
use crate::error::ServerError;

const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_');

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitTaskRequest {
    /// Raw ffmpeg/ffprobe command line or `/builtin <file-id> --opt=value`.
    #[schema(example = "/convert 3f2b8a4e-9c1d-4e2f-8a7b-1c2d3e4f5a6b --format=webm")]
    pub command: String,
    /// When set, `command` is taken verbatim as a command of this type.
    #[serde(rename = "type", default)]
    #[schema(example = "ffmpeg")]
    pub kind: Option<String>,
}

impl SubmitTaskRequest {
    pub fn into_input(self) -> Result<CommandInput, ServerError> {
        match self.kind {
            None => Ok(CommandInput::Text(self.command)),
            Some(kind) => {
                let kind = kind
                    .parse::<CommandKind>()
                    .map_err(|_| ServerError::BadRequest(format!("unknown command type: {kind}")))?;
                Ok(CommandInput::Structured {
                    kind: Some(kind),
                    command: self.command,
                })
            }
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskSummary {
    pub id: String,
    pub status: String,
    pub created_at: String,
}

impl From<SubmittedTask> for TaskSummary {
    fn from(task: SubmittedTask) -> Self {
        Self {
            id: task.id,
            status: task.status.to_string(),
            created_at: timestamp(&task.created_at),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitTaskResponse {
    pub success: bool,
    pub task: TaskSummary,
}

/// A file in a task's output directory with its download locator.
#[derive(Debug, Serialize, ToSchema)]
pub struct OutputFileResponse {
    pub filename: String,
    pub download_url: String,
    pub size: u64,
    pub mime_type: String,
}

impl OutputFileResponse {
    pub fn new(task_id: &str, file: OutputFile) -> Self {
        let encoded = utf8_percent_encode(&file.filename, FILE_NAME);
        Self {
            download_url: format!("/v1/tasks/{task_id}/files/{encoded}"),
            filename: file.filename,
            size: file.size,
            mime_type: file.mime_type,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskResponse {
    pub id: String,
    pub command: String,
    pub status: String,
    pub result_path: Option<String>,
    pub error: Option<String>,
    pub preview_path: Option<String>,
    pub preview_generated: bool,
    pub file_ids: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: String,
    /// Output files; only present for completed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<OutputFileResponse>>,
}

impl From<TaskRecord> for TaskResponse {
    fn from(task: TaskRecord) -> Self {
        Self {
            status: task.status.to_string(),
            created_at: timestamp(&task.created_at),
            updated_at: timestamp(&task.updated_at),
            expires_at: timestamp(&task.expires_at),
            id: task.id,
            command: task.command,
            result_path: task.result_path,
            error: task.error,
            preview_path: task.preview_path,
            preview_generated: task.preview_generated,
            file_ids: task.file_ids,
            files: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskDetailResponse {
    pub success: bool,
    pub task: TaskResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskStatusBody {
    pub id: String,
    pub status: String,
    pub result_path: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<TaskStatusView> for TaskStatusBody {
    fn from(view: TaskStatusView) -> Self {
        Self {
            status: view.status.to_string(),
            created_at: timestamp(&view.created_at),
            updated_at: timestamp(&view.updated_at),
            id: view.id,
            result_path: view.result_path,
            error: view.error,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskStatusResponse {
    pub success: bool,
    pub task: TaskStatusBody,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct TaskListQuery {
    /// Page size; clamped to the configured maximum.
    pub limit: Option<u32>,
    /// `next_cursor` from the previous page.
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Pagination {
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskListResponse {
    pub success: bool,
    pub data: Vec<TaskResponse>,
    pub pagination: Pagination,
}

impl From<TaskPage> for TaskListResponse {
    fn from(page: TaskPage) -> Self {
        Self {
            success: true,
            data: page.tasks.into_iter().map(TaskResponse::from).collect(),
            pagination: Pagination {
                next_cursor: page.next_cursor,
                has_more: page.has_more,
            },
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskOutputResponse {
    pub success: bool,
    pub files: Vec<OutputFileResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PreviewBody {
    pub available: bool,
    pub generating: bool,
    pub path: Option<String>,
    pub original_path: Option<String>,
}

impl From<PreviewInfo> for PreviewBody {
    fn from(info: PreviewInfo) -> Self {
        Self {
            available: info.available,
            generating: info.generating,
            path: info.path,
            original_path: info.original_path,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PreviewResponse {
    pub success: bool,
    pub preview: PreviewBody,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn typed_request_is_structured() {
        let req = SubmitTaskRequest {
            command: "ffprobe x".into(),
            kind: Some("ffprobe".into()),
        };
        assert!(matches!(
            req.into_input().unwrap(),
            CommandInput::Structured {
                kind: Some(CommandKind::Ffprobe),
                ..
            }
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let req = SubmitTaskRequest {
            command: "x".into(),
            kind: Some("sox".into()),
        };
        assert!(matches!(req.into_input(), Err(ServerError::BadRequest(_))));
    }

    #[test]
    fn download_url_escapes_file_name() {
        let file = OutputFile {
            filename: "a b.mp4".into(),
            path: PathBuf::from("/out/t/a b.mp4"),
            size: 3,
            mime_type: "video/mp4".into(),
        };
        let res = OutputFileResponse::new("t", file);
        assert_eq!(res.download_url, "/v1/tasks/t/files/a%20b.mp4");
    }
}
