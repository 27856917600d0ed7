//! Builtin command catalog.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::command::{
    BuiltinCommandResponse, CommandCatalogResponse, CommandDetailResponse, CommandQuery,
    OptionResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_commands),
    components(schemas(
        BuiltinCommandResponse,
        CommandCatalogResponse,
        CommandDetailResponse,
        OptionResponse
    ))
)]
pub struct CommandsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/commands", get(list_commands))
}

/// Every builtin with its option schema, or a single one with `?name=`.
#[utoipa::path(
    get,
    path = "/v1/commands",
    tag = "commands",
    params(CommandQuery),
    responses(
        (status = 200, description = "Builtin catalog", body = CommandCatalogResponse),
        (status = 404, description = "Unknown builtin name"),
    )
)]
pub async fn list_commands(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CommandQuery>,
) -> Result<Response, ServerError> {
    if let Some(name) = q.name.as_deref() {
        let command = state.service.builtin(name)?;
        return Ok(Json(CommandDetailResponse {
            success: true,
            command: command.into(),
        })
        .into_response());
    }

    Ok(Json(CommandCatalogResponse {
        success: true,
        commands: state
            .service
            .builtins()
            .iter()
            .map(BuiltinCommandResponse::from)
            .collect(),
    })
    .into_response())
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::routes::test_support::{app, json};

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn lists_the_catalog() {
        let t = app().await;
        let res = t.router.oneshot(get("/v1/commands")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json(res).await;
        let names: Vec<_> = body["commands"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap().to_owned())
            .collect();
        assert!(names.contains(&"convert".to_owned()));
        assert!(names.contains(&"probe".to_owned()));
    }

    #[tokio::test]
    async fn single_lookup() {
        let t = app().await;
        let res = t.router.clone().oneshot(get("/v1/commands?name=gif")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res).await["command"]["name"], "gif");

        let res = t.router.oneshot(get("/v1/commands?name=nope")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
