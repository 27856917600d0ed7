//! reel-core: media task intake, persistence and execution.
//!
//! # Layout
//!
//! - [`commands`]: builtin catalog, parser and file-reference validator.
//! - [`entities`]: SQLite-backed task and file stores.
//! - [`runtime`]: asynchronous executor and the per-task event channel.
//! - [`preview`]: best-effort previews and thumbnails.
//! - [`sweep`]: retention of expired files and tasks.
//! - [`service`]: the [`TaskService`] facade used by request handlers.

pub mod commands;
pub mod config;
pub mod entities;
pub mod error;
pub mod preview;
pub mod runtime;
pub mod service;
pub mod sweep;

pub use config::{CoreConfig, PageLimits, PreviewConfig, StorageLayout};
pub use error::{CoreError, Result};
pub use service::TaskService;
