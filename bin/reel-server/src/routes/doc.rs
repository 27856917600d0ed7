use utoipa::OpenApi;

use crate::routes::health::HealthApi;
use crate::routes::v1;

#[derive(OpenApi)]
#[openapi(info(
    title = "reel-server",
    description = "Command-driven media task service",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(HealthApi::openapi());
    root.merge(v1::api_docs());
    root
}
