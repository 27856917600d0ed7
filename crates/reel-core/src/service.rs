//! The request-facing facade over the core components.
//!
//! Submission runs parse → validate → create → enqueue and returns as soon as
//! the task row exists; everything after that happens on the executor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::commands::{self, BuiltinCommand, CommandInput};
use crate::config::CoreConfig;
use crate::entities::{
    FileRecord, FileStore, RecoveryReport, TaskPage, TaskRecord, TaskStatus, TaskStore,
};
use crate::error::{CoreError, Result};
use crate::preview::{detect_mime_named, PreviewGenerator, Transcoder};
use crate::runtime::{EventBus, EventKind, Executor, ExecutorHandle, Subscription};
use crate::sweep::RetentionSweep;

/// What a successful submission returns.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedTask {
    pub id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// Status projection of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    pub id: String,
    pub status: TaskStatus,
    pub result_path: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TaskRecord> for TaskStatusView {
    fn from(task: TaskRecord) -> Self {
        Self {
            id: task.id,
            status: task.status,
            result_path: task.result_path,
            error: task.error,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// A file in a task's output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputArtifacts {
    /// Not completed, or completed without writing anything.
    None,
    Single(OutputFile),
    Multiple(Vec<OutputFile>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewInfo {
    pub available: bool,
    /// A result exists but the preview attempt has not finished yet.
    pub generating: bool,
    pub path: Option<String>,
    pub original_path: Option<String>,
}

#[derive(Clone)]
pub struct TaskService<S> {
    store: S,
    executor: ExecutorHandle,
    events: EventBus,
    previews: PreviewGenerator,
    config: Arc<CoreConfig>,
}

impl<S> TaskService<S>
where
    S: TaskStore + FileStore + Clone,
{
    /// Wire up the event bus, preview generator and executor.
    pub fn start(store: S, transcoder: Arc<dyn Transcoder>, config: CoreConfig) -> Self {
        let events = EventBus::new();
        let previews = PreviewGenerator::new(transcoder, config.layout.clone(), config.preview.clone());
        let executor = Executor::start(store.clone(), events.clone(), Some(previews.clone()), &config);
        Self {
            store,
            executor,
            events,
            previews,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Fail tasks interrupted by a previous shutdown and re-enqueue the ones
    /// that never started.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let report = self.store.recover_interrupted().await?;
        for id in &report.pending {
            self.executor.submit(id.clone()).await?;
        }
        if report.interrupted > 0 || !report.pending.is_empty() {
            info!(
                interrupted = report.interrupted,
                requeued = report.pending.len(),
                "recovered tasks from previous run"
            );
        }
        Ok(report)
    }

    pub fn retention_sweep(&self, interval: Duration) -> RetentionSweep<S> {
        RetentionSweep::new(self.store.clone(), self.config.layout.clone(), interval)
    }

    // ── tasks ────────────────────────────────────────────────────────────────

    pub async fn submit(&self, input: &CommandInput) -> Result<SubmittedTask> {
        let parsed = commands::resolve(input)?;
        let validation = commands::validate(&self.store, &parsed.command).await?;
        if !validation.is_valid {
            let reason = validation
                .error
                .unwrap_or_else(|| "invalid command".to_owned());
            return Err(CoreError::Validation(reason));
        }

        let expires_at = Utc::now() + ttl(self.config.task_ttl);
        let task = self
            .store
            .create_task(&parsed.command, &validation.file_ids, expires_at)
            .await?;
        info!(task_id = %task.id, kind = %parsed.kind, "task created");

        if let Err(e) = self.executor.submit(task.id.clone()).await {
            self.store.mark_failed(&task.id, &e.to_string()).await?;
            return Err(e);
        }

        Ok(SubmittedTask {
            id: task.id,
            status: task.status,
            created_at: task.created_at,
        })
    }

    pub async fn get(&self, id: &str) -> Result<TaskRecord> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))
    }

    pub async fn status(&self, id: &str) -> Result<TaskStatusView> {
        self.get(id).await.map(TaskStatusView::from)
    }

    pub async fn list(&self, limit: Option<u32>, cursor: Option<&str>) -> Result<TaskPage> {
        let limit = self.config.page_limits.clamp(limit);
        Ok(self.store.list_tasks(limit, cursor).await?)
    }

    /// `false` when the task does not exist. The output directory goes first
    /// (best-effort), then the rows in one transaction.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        if self.store.get_task(id).await?.is_none() {
            return Ok(false);
        }

        let dir = self.config.layout.task_output_dir(id);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(task_id = id, error = %e, "failed to remove task output directory");
            }
        }

        let deleted = self.store.delete_task(id).await?;
        if deleted {
            info!(task_id = id, "task deleted");
        }
        Ok(deleted)
    }

    pub fn subscribe(&self, id: &str, kinds: &[EventKind]) -> Subscription {
        self.events.subscribe(id, kinds)
    }

    // ── outputs ──────────────────────────────────────────────────────────────

    pub async fn output_artifacts(&self, id: &str) -> Result<OutputArtifacts> {
        let task = self.get(id).await?;
        if task.status != TaskStatus::Completed {
            return Ok(OutputArtifacts::None);
        }

        let dir = self.config.layout.task_output_dir(id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(OutputArtifacts::None),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().into_owned();
            files.push(output_file(filename, entry.path(), meta.len()));
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));

        Ok(match files.len() {
            0 => OutputArtifacts::None,
            1 => OutputArtifacts::Single(files.remove(0)),
            _ => OutputArtifacts::Multiple(files),
        })
    }

    /// One file of a task's output, by plain file name.
    pub async fn output_file(&self, id: &str, filename: &str) -> Result<OutputFile> {
        if filename.is_empty()
            || filename == "."
            || filename == ".."
            || filename.contains(['/', '\\'])
        {
            return Err(CoreError::Validation(format!("invalid file name: {filename}")));
        }
        self.get(id).await?;

        let path = self.config.layout.task_output_dir(id).join(filename);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(output_file(filename.to_owned(), path, meta.len())),
            Ok(_) => Err(CoreError::NotFound(format!("file {filename}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::NotFound(format!("file {filename}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn preview_info(&self, id: &str) -> Result<PreviewInfo> {
        let task = self.get(id).await?;
        Ok(PreviewInfo {
            available: task.preview_path.is_some(),
            generating: !task.preview_generated && task.result_path.is_some(),
            path: task.preview_path,
            original_path: task.result_path,
        })
    }

    // ── builtins ─────────────────────────────────────────────────────────────

    pub fn builtins(&self) -> &'static [BuiltinCommand] {
        commands::builtins()
    }

    pub fn builtin(&self, name: &str) -> Result<&'static BuiltinCommand> {
        commands::builtin(name).ok_or_else(|| CoreError::NotFound(format!("builtin command {name}")))
    }

    // ── files ────────────────────────────────────────────────────────────────

    /// Allocate an id and the storage path its content should be written to.
    pub async fn reserve_upload(&self) -> Result<(String, PathBuf)> {
        let id = Uuid::new_v4().to_string();
        fs::create_dir_all(self.config.layout.upload_dir()).await?;
        let path = self.config.layout.upload_path(&id);
        Ok((id, path))
    }

    /// Record content already written to `stored_path` and start thumbnail
    /// generation in the background.
    pub async fn register_upload(&self, id: &str, file_name: &str, stored_path: &Path) -> Result<FileRecord> {
        let size = fs::metadata(stored_path).await?.len();
        let (path, name) = (stored_path.to_path_buf(), file_name.to_owned());
        let mime_type = tokio::task::spawn_blocking(move || detect_mime_named(&path, name))
            .await
            .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;

        let now = Utc::now();
        let record = FileRecord {
            id: id.to_owned(),
            file_name: file_name.to_owned(),
            file_path: stored_path.to_string_lossy().into_owned(),
            file_size: i64::try_from(size).unwrap_or(i64::MAX),
            mime_type,
            thumbnail_path: None,
            uploaded_at: now,
            expires_at: now + ttl(self.config.file_ttl),
        };
        self.store.insert_file(&record).await?;
        info!(file_id = id, size, mime = %record.mime_type, "file uploaded");

        let (store, previews, file) = (self.store.clone(), self.previews.clone(), record.clone());
        tokio::spawn(async move {
            previews.generate_thumbnail(&store, &file).await;
        });
        Ok(record)
    }

    pub async fn get_file(&self, id: &str) -> Result<FileRecord> {
        self.store
            .get_file(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("file {id}")))
    }

    /// Remove a file's content, thumbnail and record. Tasks keep their rows.
    pub async fn delete_file(&self, id: &str) -> Result<bool> {
        let Some(file) = self.store.get_file(id).await? else {
            return Ok(false);
        };
        let thumbnail = file
            .thumbnail_path
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.layout.thumbnail_path(id));
        for path in [PathBuf::from(&file.file_path), thumbnail] {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file_id = id, path = %path.display(), error = %e, "failed to remove file content");
                }
            }
        }
        Ok(self.store.delete_file(id).await?)
    }
}

/// Expiry horizons are capped at roughly a century.
fn ttl(d: Duration) -> TimeDelta {
    let cap = TimeDelta::days(36_500);
    TimeDelta::from_std(d).map_or(cap, |d| d.min(cap))
}

fn output_file(filename: String, path: PathBuf, size: u64) -> OutputFile {
    let mime_type = mime_guess::from_path(&filename)
        .first_or_octet_stream()
        .essence_str()
        .to_owned();
    OutputFile {
        filename,
        path,
        size,
        mime_type,
    }
}
