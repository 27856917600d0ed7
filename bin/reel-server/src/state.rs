//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use reel_core::entities::SqliteStore;
use reel_core::TaskService;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Task intake, execution and file storage.
    pub service: TaskService<SqliteStore>,
}
