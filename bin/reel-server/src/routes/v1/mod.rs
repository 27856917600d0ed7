pub mod commands;
pub mod files;
pub mod tasks;

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::Response;
use axum::Router;
use reel_core::commands::is_canonical_uuid;
use tokio_util::io::ReaderStream;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::middleware::auth;
use crate::state::AppState;

/// Routes nested under `/v1`.
///
/// The progress stream stays outside the token check: browser `EventSource`
/// clients cannot set an `Authorization` header.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .merge(tasks::router())
        .merge(commands::router())
        .merge(files::router(&state.config))
        .route_layer(middleware::from_fn_with_state(state, auth::check_api_token));

    Router::new().merge(protected).merge(tasks::progress_router())
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = V1Api::openapi();
    spec.merge(tasks::TasksApi::openapi());
    spec.merge(commands::CommandsApi::openapi());
    spec.merge(files::FilesApi::openapi());
    spec
}

/// Reject anything that is not a canonical UUID before touching the store.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<String, ServerError> {
    if is_canonical_uuid(raw) {
        Ok(raw.to_ascii_lowercase())
    } else {
        Err(ServerError::BadRequest(format!("invalid {what} id")))
    }
}

/// Stream a file from disk as an attachment.
pub(crate) async fn attachment(
    path: &Path,
    filename: &str,
    mime_type: &str,
    size: u64,
) -> Result<Response, ServerError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ServerError::NotFound(format!("file {filename}")));
        }
        Err(e) => return Err(e.into()),
    };
    let disposition = format!("attachment; filename=\"{}\"", filename.replace(['"', '\\'], "_"));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type)
        .header(header::CONTENT_LENGTH, size)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ServerError::Internal(e.to_string()))
}
