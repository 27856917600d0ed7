//! Upload storage: the files commands refer to by id.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use utoipa::OpenApi;

use super::{attachment, parse_id};
use crate::config::Config;
use crate::error::ServerError;
use crate::schemas::v1::file::{FileDetailResponse, FileResponse};
use crate::schemas::v1::task::DeleteResponse;
use crate::state::AppState;

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(upload_file, get_file, get_thumbnail, delete_file),
    components(schemas(FileResponse, FileDetailResponse))
)]
pub struct FilesApi;

pub fn router(config: &Config) -> Router<Arc<AppState>> {
    let limit = config.max_upload_bytes().saturating_add(MULTIPART_OVERHEAD);
    Router::new()
        .route("/files", post(upload_file).layer(DefaultBodyLimit::max(limit)))
        .route("/files/{id}", get(get_file).delete(delete_file))
        .route("/files/{id}/thumbnail", get(get_thumbnail))
}

#[utoipa::path(
    post,
    path = "/v1/files",
    tag = "files",
    request_body(content_type = "multipart/form-data", description = "A single `file` field"),
    responses(
        (status = 201, description = "File stored", body = FileDetailResponse),
        (status = 400, description = "No file in the request"),
        (status = 413, description = "File too large"),
    )
)]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileDetailResponse>), ServerError> {
    let cap = state.config.max_upload_bytes();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("failed to read multipart field: {e}")))?
    {
        if field.name() != Some("file") {
            debug!(field = ?field.name(), "ignoring multipart field");
            continue;
        }
        let file_name = sanitize_file_name(field.file_name().unwrap_or("upload"));
        let (id, path) = state.service.reserve_upload().await?;

        let stored = match write_field(&mut field, &path, cap).await {
            Ok(0) => Err(ServerError::BadRequest("uploaded file is empty".into())),
            Ok(_) => state
                .service
                .register_upload(&id, &file_name, &path)
                .await
                .map_err(ServerError::from),
            Err(e) => Err(e),
        };
        return match stored {
            Ok(record) => {
                info!(file_id = %id, file_name = %file_name, "upload stored");
                Ok((
                    StatusCode::CREATED,
                    Json(FileDetailResponse {
                        success: true,
                        file: record.into(),
                    }),
                ))
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %rm, "failed to remove rejected upload");
                }
                Err(e)
            }
        };
    }

    Err(ServerError::BadRequest("no file uploaded".into()))
}

async fn write_field(field: &mut Field<'_>, path: &FsPath, cap: usize) -> Result<u64, ServerError> {
    let mut out = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ServerError::BadRequest(format!("failed to read file chunk: {e}")))?
    {
        written = written.saturating_add(chunk.len() as u64);
        if written > cap as u64 {
            return Err(ServerError::PayloadTooLarge(format!(
                "file exceeds the maximum of {} MB",
                cap / (1024 * 1024)
            )));
        }
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    Ok(written)
}

/// Keep only the final path component of a client-supplied name.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let clean: String = base.chars().filter(|c| !c.is_control()).collect();
    if clean.is_empty() || clean == "." || clean == ".." {
        "upload".to_owned()
    } else {
        clean
    }
}

#[utoipa::path(
    get,
    path = "/v1/files/{id}",
    tag = "files",
    params(("id" = String, Path, description = "File id")),
    responses(
        (status = 200, description = "File metadata", body = FileDetailResponse),
        (status = 400, description = "Invalid file id"),
        (status = 404, description = "File not found"),
    )
)]
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FileDetailResponse>, ServerError> {
    let id = parse_id(&id, "file")?;
    let record = state.service.get_file(&id).await?;
    Ok(Json(FileDetailResponse {
        success: true,
        file: record.into(),
    }))
}

#[utoipa::path(
    get,
    path = "/v1/files/{id}/thumbnail",
    tag = "files",
    params(("id" = String, Path, description = "File id")),
    responses(
        (status = 200, description = "JPEG thumbnail"),
        (status = 400, description = "Invalid file id"),
        (status = 404, description = "File or thumbnail not found"),
    )
)]
pub async fn get_thumbnail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let id = parse_id(&id, "file")?;
    let record = state.service.get_file(&id).await?;
    let thumbnail = record
        .thumbnail_path
        .ok_or_else(|| ServerError::NotFound(format!("thumbnail for file {id}")))?;
    let path = FsPath::new(&thumbnail);
    let size = tokio::fs::metadata(path)
        .await
        .map_err(|_| ServerError::NotFound(format!("thumbnail for file {id}")))?
        .len();
    attachment(path, &format!("{id}.jpg"), "image/jpeg", size).await
}

#[utoipa::path(
    delete,
    path = "/v1/files/{id}",
    tag = "files",
    params(("id" = String, Path, description = "File id")),
    responses(
        (status = 200, description = "File deleted", body = DeleteResponse),
        (status = 400, description = "Invalid file id"),
        (status = 404, description = "File not found"),
    )
)]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServerError> {
    let id = parse_id(&id, "file")?;
    if !state.service.delete_file(&id).await? {
        return Err(ServerError::NotFound(format!("file {id}")));
    }
    info!(file_id = %id, "file deleted");
    Ok(Json(DeleteResponse { success: true }))
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use super::*;
    use crate::routes::test_support::{app, app_with, json};

    const BOUNDARY: &str = "reel-test-boundary";

    fn upload(name: &str, content: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri("/v1/files")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn client_paths_are_stripped() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\clips\\a.mp4"), "a.mp4");
        assert_eq!(sanitize_file_name(".."), "upload");
    }

    #[tokio::test]
    async fn upload_fetch_and_delete() {
        let t = app().await;
        let res = t
            .router
            .clone()
            .oneshot(upload("clip.txt", b"hello world"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json(res).await;
        let id = body["file"]["id"].as_str().unwrap().to_owned();
        assert_eq!(body["file"]["file_name"], "clip.txt");
        assert_eq!(body["file"]["file_size"], 11);
        assert_eq!(body["file"]["mime_type"], "text/plain");

        let res = t
            .router
            .clone()
            .oneshot(request("GET", &format!("/v1/files/{id}")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = t
            .router
            .clone()
            .oneshot(request("GET", &format!("/v1/files/{id}/thumbnail")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = t
            .router
            .clone()
            .oneshot(request("DELETE", &format!("/v1/files/{id}")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = t
            .router
            .oneshot(request("GET", &format!("/v1/files/{id}")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_removed() {
        let t = app_with(crate::config::Config {
            max_upload_size_mb: 1,
            ..Default::default()
        })
        .await;
        let big = vec![b'x'; 1024 * 1024 + 1];
        let res = t.router.oneshot(upload("big.bin", &big)).await.unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let mut entries = std::fs::read_dir(t.state.service.config().layout.upload_dir()).unwrap();
        assert!(entries.all(|e| e.unwrap().file_type().unwrap().is_dir()));
    }

    #[tokio::test]
    async fn request_without_file_field_is_rejected() {
        let t = app().await;
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhi\r\n--{BOUNDARY}--\r\n"
        );
        let req = Request::builder()
            .method("POST")
            .uri("/v1/files")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        let res = t.router.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
