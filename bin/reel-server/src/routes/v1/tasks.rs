//! Task intake, inspection, output download and progress streaming.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use reel_core::commands::is_canonical_uuid;
use reel_core::entities::{TaskRecord, TaskStatus};
use reel_core::runtime::{EventKind, Subscription, TaskEvent};
use reel_core::service::OutputArtifacts;
use tracing::{info, warn};
use utoipa::OpenApi;

use super::{attachment, parse_id};
use crate::error::ServerError;
use crate::schemas::v1::task::{
    DeleteResponse, OutputFileResponse, Pagination, PreviewBody, PreviewResponse,
    SubmitTaskRequest, SubmitTaskResponse, TaskDetailResponse, TaskListQuery, TaskListResponse,
    TaskOutputResponse, TaskResponse, TaskStatusBody, TaskStatusResponse, TaskSummary,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        submit_task,
        list_tasks,
        get_task,
        get_task_status,
        get_task_output,
        get_task_file,
        get_task_preview,
        stream_progress,
        delete_task
    ),
    components(schemas(
        SubmitTaskRequest,
        SubmitTaskResponse,
        TaskSummary,
        TaskResponse,
        TaskDetailResponse,
        TaskStatusBody,
        TaskStatusResponse,
        TaskListResponse,
        Pagination,
        OutputFileResponse,
        TaskOutputResponse,
        PreviewBody,
        PreviewResponse,
        DeleteResponse
    ))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks).post(submit_task))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/status", get(get_task_status))
        .route("/tasks/{id}/output", get(get_task_output))
        .route("/tasks/{id}/files/{name}", get(get_task_file))
        .route("/tasks/{id}/preview", get(get_task_preview))
}

pub fn progress_router() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/{id}/progress", get(stream_progress))
}

#[utoipa::path(
    post,
    path = "/v1/tasks",
    tag = "tasks",
    request_body = SubmitTaskRequest,
    responses(
        (status = 201, description = "Task created", body = SubmitTaskResponse),
        (status = 400, description = "Malformed command or unknown file references"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ServerError> {
    let input = req.into_input()?;
    let task = state.service.submit(&input).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitTaskResponse {
            success: true,
            task: task.into(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/tasks",
    tag = "tasks",
    params(TaskListQuery),
    responses(
        (status = 200, description = "Tasks listed, newest first", body = TaskListResponse),
        (status = 400, description = "Invalid cursor"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>, ServerError> {
    let cursor = match q.cursor.as_deref() {
        Some(c) if !is_canonical_uuid(c) => {
            return Err(ServerError::BadRequest("invalid cursor".into()));
        }
        other => other.map(str::to_ascii_lowercase),
    };
    let page = state.service.list(q.limit, cursor.as_deref()).await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task with its output files when completed", body = TaskDetailResponse),
        (status = 400, description = "Invalid task id"),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskDetailResponse>, ServerError> {
    let id = parse_id(&id, "task")?;
    let record = state.service.get(&id).await?;
    let completed = record.status == TaskStatus::Completed;
    let mut task = TaskResponse::from(record);

    if completed {
        let files = match state.service.output_artifacts(&id).await? {
            OutputArtifacts::None => Vec::new(),
            OutputArtifacts::Single(file) => vec![file],
            OutputArtifacts::Multiple(files) => files,
        };
        task.files = Some(
            files
                .into_iter()
                .map(|f| OutputFileResponse::new(&id, f))
                .collect(),
        );
    }

    Ok(Json(TaskDetailResponse {
        success: true,
        task,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}/status",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task status", body = TaskStatusResponse),
        (status = 400, description = "Invalid task id"),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn get_task_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ServerError> {
    let id = parse_id(&id, "task")?;
    let view = state.service.status(&id).await?;
    Ok(Json(TaskStatusResponse {
        success: true,
        task: view.into(),
    }))
}

/// A lone output file is streamed directly; several are listed with
/// per-file download locators.
#[utoipa::path(
    get,
    path = "/v1/tasks/{id}/output",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Output file bytes, or metadata for multiple files", body = TaskOutputResponse),
        (status = 400, description = "Invalid task id"),
        (status = 404, description = "Task not found or has no output"),
    )
)]
pub async fn get_task_output(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let id = parse_id(&id, "task")?;
    match state.service.output_artifacts(&id).await? {
        OutputArtifacts::None => Err(ServerError::NotFound(format!("task {id} has no output"))),
        OutputArtifacts::Single(file) => {
            attachment(&file.path, &file.filename, &file.mime_type, file.size).await
        }
        OutputArtifacts::Multiple(files) => Ok(Json(TaskOutputResponse {
            success: true,
            files: files
                .into_iter()
                .map(|f| OutputFileResponse::new(&id, f))
                .collect(),
        })
        .into_response()),
    }
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}/files/{name}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task id"),
        ("name" = String, Path, description = "Output file name"),
    ),
    responses(
        (status = 200, description = "Output file bytes"),
        (status = 400, description = "Invalid task id or file name"),
        (status = 404, description = "Task or file not found"),
    )
)]
pub async fn get_task_file(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    let id = parse_id(&id, "task")?;
    let file = state.service.output_file(&id, &name).await?;
    attachment(&file.path, &file.filename, &file.mime_type, file.size).await
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}/preview",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Preview availability", body = PreviewResponse),
        (status = 400, description = "Invalid task id"),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn get_task_preview(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PreviewResponse>, ServerError> {
    let id = parse_id(&id, "task")?;
    let info = state.service.preview_info(&id).await?;
    Ok(Json(PreviewResponse {
        success: true,
        preview: info.into(),
    }))
}

#[utoipa::path(
    delete,
    path = "/v1/tasks/{id}",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task deleted", body = DeleteResponse),
        (status = 400, description = "Invalid task id"),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServerError> {
    let id = parse_id(&id, "task")?;
    if !state.service.delete(&id).await? {
        warn!(task_id = %id, "task not found for deletion");
        return Err(ServerError::NotFound(format!("task {id}")));
    }
    info!(task_id = %id, "task deleted");
    Ok(Json(DeleteResponse { success: true }))
}

/// Server-sent events for one task: `progress` while running, then a single
/// `complete` or `failed` after which the stream ends. A task that already
/// finished yields its terminal event immediately.
#[utoipa::path(
    get,
    path = "/v1/tasks/{id}/progress",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "text/event-stream of task events"),
        (status = 400, description = "Invalid task id"),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn stream_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let id = parse_id(&id, "task")?;
    // Subscribe before reading the row so a transition in between is not lost.
    let subscription = state.service.subscribe(&id, &EventKind::ALL);
    let task = state.service.get(&id).await?;

    let feed = match terminal_event(&task) {
        Some(event) => Feed::Snapshot(event),
        None => Feed::Live(subscription),
    };
    let events = stream::unfold(feed, next_event).map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

enum Feed {
    Snapshot(TaskEvent),
    Live(Subscription),
    Done,
}

async fn next_event(feed: Feed) -> Option<(TaskEvent, Feed)> {
    match feed {
        Feed::Snapshot(event) => Some((event, Feed::Done)),
        Feed::Live(mut sub) => {
            let event = sub.recv().await?;
            let next = if event.is_terminal() {
                Feed::Done
            } else {
                Feed::Live(sub)
            };
            Some((event, next))
        }
        Feed::Done => None,
    }
}

fn terminal_event(task: &TaskRecord) -> Option<TaskEvent> {
    match task.status {
        TaskStatus::Completed => Some(TaskEvent::Complete {
            task_id: task.id.clone(),
            result_path: task.result_path.clone(),
        }),
        TaskStatus::Failed => Some(TaskEvent::Failed {
            task_id: task.id.clone(),
            error: task.error.clone().unwrap_or_default(),
        }),
        TaskStatus::Pending | TaskStatus::Processing => None,
    }
}

fn sse_event(event: &TaskEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_owned());
    Event::default().event(event.kind().as_ref()).data(data)
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::routes::test_support::{app, app_with, json};

    const MISSING: &str = "01890a5d-ac96-774b-bcce-b302099a8057";

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn unknown_file_reference_is_rejected() {
        let t = app().await;
        let res = t
            .router
            .clone()
            .oneshot(post_json(
                "/v1/tasks",
                serde_json::json!({ "command": format!("ffmpeg -i {MISSING} out.mp4") }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = json(res).await;
        assert_eq!(body["error"], format!("files not found: {MISSING}"));

        let res = t.router.oneshot(get("/v1/tasks")).await.unwrap();
        let body = json(res).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
        assert_eq!(body["pagination"]["has_more"], false);
    }

    #[tokio::test]
    async fn malformed_builtin_is_rejected() {
        let t = app().await;
        let res = t
            .router
            .oneshot(post_json(
                "/v1/tasks",
                serde_json::json!({ "command": "/convert not-a-uuid" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_ids_never_reach_the_store() {
        let t = app().await;
        for uri in ["/v1/tasks/nope", "/v1/tasks/nope/status", "/v1/tasks/nope/progress"] {
            let res = t.router.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
        let res = t.router.oneshot(get("/v1/tasks?cursor=zzz")).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_task_is_not_found() {
        let t = app().await;
        for uri in [
            format!("/v1/tasks/{MISSING}"),
            format!("/v1/tasks/{MISSING}/status"),
            format!("/v1/tasks/{MISSING}/output"),
            format!("/v1/tasks/{MISSING}/preview"),
            format!("/v1/tasks/{MISSING}/progress"),
        ] {
            let res = t.router.clone().oneshot(get(&uri)).await.unwrap();
            assert_eq!(res.status(), StatusCode::NOT_FOUND, "{uri}");
        }
        let res = t
            .router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/v1/tasks/{MISSING}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn token_guards_everything_but_progress() {
        let t = app_with(Config {
            api_token: Some("secret".into()),
            ..Config::default()
        })
        .await;

        let res = t.router.clone().oneshot(get("/v1/tasks")).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let authorised = Request::builder()
            .uri("/v1/tasks")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let res = t.router.clone().oneshot(authorised).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = t
            .router
            .oneshot(get(&format!("/v1/tasks/{MISSING}/progress")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn submitted_task_runs_and_serves_output() {
        let t = app().await;
        let (file_id, path) = t.state.service.reserve_upload().await.unwrap();
        tokio::fs::write(&path, "payload").await.unwrap();
        t.state
            .service
            .register_upload(&file_id, "notes.txt", &path)
            .await
            .unwrap();

        let res = t
            .router
            .clone()
            .oneshot(post_json(
                "/v1/tasks",
                serde_json::json!({ "command": format!("cp {file_id} result.txt"), "type": "ffmpeg" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json(res).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["task"]["status"], "pending");
        let task_id = body["task"]["id"].as_str().unwrap().to_owned();

        // the progress stream ends with the terminal event
        let res = t
            .router
            .clone()
            .oneshot(get(&format!("/v1/tasks/{task_id}/progress")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            res.into_body().collect(),
        )
        .await
        .unwrap()
        .unwrap()
        .to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("event: complete"), "{text}");

        let res = t
            .router
            .clone()
            .oneshot(get(&format!("/v1/tasks/{task_id}")))
            .await
            .unwrap();
        let body = json(res).await;
        assert_eq!(body["task"]["status"], "completed");
        assert_eq!(body["task"]["file_ids"][0], file_id.as_str());
        assert_eq!(body["task"]["files"][0]["filename"], "result.txt");

        let res = t
            .router
            .clone()
            .oneshot(get(&format!("/v1/tasks/{task_id}/output")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"result.txt\""
        );
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"payload");

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/tasks/{task_id}"))
                .body(Body::empty())
                .unwrap()
        };
        let res = t.router.clone().oneshot(delete()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = t.router.oneshot(delete()).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
