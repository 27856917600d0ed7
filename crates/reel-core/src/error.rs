use thiserror::Error;

use crate::commands::CommandError;

/// Errors surfaced synchronously by reel-core operations.
///
/// Execution and preview failures never appear here: they are recorded on the
/// task row (see [`crate::runtime::ExecError`]) or logged and dropped
/// (see [`crate::preview::PreviewError`]).
#[derive(Debug, Error)]
pub enum CoreError {
    /// The submitted command was malformed or referenced unknown files.
    #[error("{0}")]
    Validation(String),

    /// The caller referenced a task or file that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Propagated from the SQLite store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded migrations failed to apply.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A filesystem I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The executor dispatch loop is gone; no more work can be submitted.
    #[error("executor queue closed")]
    QueueClosed,
}

impl From<CommandError> for CoreError {
    fn from(e: CommandError) -> Self {
        CoreError::Validation(e.to_string())
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
