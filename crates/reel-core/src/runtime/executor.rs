use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::{NoExpand, RegexBuilder};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{CoreConfig, StorageLayout};
use crate::entities::{FileStore, TaskStore};
use crate::error::CoreError;
use crate::preview::PreviewGenerator;
use crate::runtime::events::{EventBus, TaskEvent};
use crate::runtime::process::run_shell;
use crate::runtime::progress::ProgressTracker;

/// Why a task ended up `failed`. Only ever stringified onto the task row and
/// the `failed` event.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("task {0} no longer exists")]
    Vanished(String),

    #[error("input file {0} is no longer available")]
    MissingInput(String),

    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("command exited with {status}: {tail}")]
    NonZeroExit { status: String, tail: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Submission side of the executor. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ExecutorHandle {
    tx: mpsc::Sender<String>,
}

impl ExecutorHandle {
    /// Enqueue `task_id` for execution. Waits while the queue is full.
    pub async fn submit(&self, task_id: impl Into<String>) -> Result<(), CoreError> {
        self.tx
            .send(task_id.into())
            .await
            .map_err(|_| CoreError::QueueClosed)
    }
}

enum Outcome {
    Completed { result_path: Option<PathBuf> },
    Skipped,
}

/// Runs each submitted task's command as an external process and owns every
/// status transition after `pending`.
pub struct Executor<S> {
    store: S,
    events: EventBus,
    previews: Option<PreviewGenerator>,
    layout: StorageLayout,
    limiter: Option<Arc<Semaphore>>,
}

impl<S> Executor<S>
where
    S: TaskStore + FileStore + Clone,
{
    /// Spawn the dispatch loop and return the handle used to feed it.
    ///
    /// The loop stops once every [`ExecutorHandle`] is dropped.
    pub fn start(
        store: S,
        events: EventBus,
        previews: Option<PreviewGenerator>,
        config: &CoreConfig,
    ) -> ExecutorHandle {
        let (tx, rx) = mpsc::channel::<String>(config.queue_capacity.max(1));
        let limiter = (config.max_concurrent_tasks > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent_tasks)));
        let executor = Arc::new(Self {
            store,
            events,
            previews,
            layout: config.layout.clone(),
            limiter,
        });

        tokio::spawn(async move {
            executor.run_loop(rx).await;
        });

        ExecutorHandle { tx }
    }

    async fn run_loop(self: Arc<Self>, mut rx: mpsc::Receiver<String>) {
        while let Some(task_id) = rx.recv().await {
            let executor = Arc::clone(&self);
            tokio::spawn(async move {
                executor.run(task_id).await;
            });
        }
        debug!("executor queue closed");
    }

    async fn run(&self, task_id: String) {
        let permit = match self.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(task_id = %task_id, "executor shut down before task started");
                return;
            }
        };

        match self.execute(&task_id).await {
            Ok(Outcome::Completed { result_path }) => {
                drop(permit);
                if let Some(previews) = &self.previews {
                    previews
                        .generate_for_task(&self.store, &task_id, result_path.as_deref())
                        .await;
                }
            }
            Ok(Outcome::Skipped) => {}
            Err(e) => {
                drop(permit);
                self.fail(&task_id, e).await;
            }
        }
    }

    async fn acquire(&self) -> Result<Option<OwnedSemaphorePermit>, tokio::sync::AcquireError> {
        match &self.limiter {
            Some(limiter) => Arc::clone(limiter).acquire_owned().await.map(Some),
            None => Ok(None),
        }
    }

    async fn execute(&self, task_id: &str) -> Result<Outcome, ExecError> {
        fs::create_dir_all(self.layout.output_dir()).await?;

        if !self.store.mark_processing(task_id).await? {
            return match self.store.get_task(task_id).await? {
                None => Err(ExecError::Vanished(task_id.to_owned())),
                Some(task) => {
                    warn!(task_id, status = %task.status, "task is not pending; skipping");
                    Ok(Outcome::Skipped)
                }
            };
        }
        info!(task_id, "task processing");

        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| ExecError::Vanished(task_id.to_owned()))?;

        let mut command = task.command.clone();
        for file_id in &task.file_ids {
            let file = self
                .store
                .get_file(file_id)
                .await?
                .ok_or_else(|| ExecError::MissingInput(file_id.clone()))?;
            let path = file.absolute_path()?;
            command = substitute(&command, file_id, &path.to_string_lossy());
        }

        let task_dir = self.layout.task_output_dir(task_id);
        fs::create_dir_all(&task_dir).await?;
        debug!(task_id, %command, dir = %task_dir.display(), "starting command");

        let mut tracker = ProgressTracker::default();
        let events = &self.events;
        let output = run_shell(&command, &task_dir, |line| {
            debug!(task_id, "{line}");
            if let Some(p) = tracker.observe(line) {
                events.publish(TaskEvent::Progress {
                    task_id: task_id.to_owned(),
                    out_time_secs: p.out_time_secs,
                    duration_secs: p.duration_secs,
                    percent: p.percent,
                });
            }
        })
        .await
        .map_err(ExecError::Spawn)?;

        if !output.status.success() {
            return Err(ExecError::NonZeroExit {
                status: output.status.to_string(),
                tail: output.tail_text(),
            });
        }

        let result_path = first_output(&task_dir).await?;
        let recorded = result_path.as_ref().map(|p| p.to_string_lossy().into_owned());

        if !self.store.mark_completed(task_id, recorded.as_deref()).await? {
            // Deleted while running: the rows are gone, drop what we wrote.
            info!(task_id, "task deleted during execution; discarding output");
            remove_dir(&task_dir).await;
            return Ok(Outcome::Skipped);
        }

        info!(task_id, result = ?recorded, "task completed");
        self.events.publish(TaskEvent::Complete {
            task_id: task_id.to_owned(),
            result_path: recorded,
        });
        Ok(Outcome::Completed { result_path })
    }

    async fn fail(&self, task_id: &str, err: ExecError) {
        let message = err.to_string();
        match self.store.mark_failed(task_id, &message).await {
            Ok(true) => {
                error!(task_id, error = %message, "task failed");
                self.events.publish(TaskEvent::Failed {
                    task_id: task_id.to_owned(),
                    error: message,
                });
            }
            Ok(false) => {
                info!(task_id, error = %message, "task vanished before failure was recorded");
                remove_dir(&self.layout.task_output_dir(task_id)).await;
            }
            Err(e) => {
                error!(task_id, error = %e, cause = %message, "failed to record task failure");
            }
        }
    }
}

/// Replace every occurrence of `file_id` (any letter case) with `path`.
fn substitute(command: &str, file_id: &str, path: &str) -> String {
    match RegexBuilder::new(&regex::escape(file_id))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.replace_all(command, NoExpand(path)).into_owned(),
        Err(_) => command.replace(file_id, path),
    }
}

/// The first regular file in `dir` by name, if any.
async fn first_output(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    match files.into_iter().next() {
        Some(path) => Ok(Some(std::path::absolute(path)?)),
        None => Ok(None),
    }
}

async fn remove_dir(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove task directory"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn substitution_is_global_and_case_insensitive() {
        let id = "3f2b8a4e-9c1d-4e2f-8a7b-1c2d3e4f5a6b";
        let cmd = format!(
            "ffmpeg -i \"{id}\" -i {} out.mp4",
            id.to_ascii_uppercase()
        );
        assert_eq!(
            substitute(&cmd, id, "/data/up/x"),
            "ffmpeg -i \"/data/up/x\" -i /data/up/x out.mp4"
        );
    }

    #[test]
    fn substitution_does_not_expand_dollar_signs() {
        let id = "3f2b8a4e-9c1d-4e2f-8a7b-1c2d3e4f5a6b";
        assert_eq!(substitute(id, id, "/tmp/$1"), "/tmp/$1");
    }

    #[tokio::test]
    async fn first_output_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(first_output(dir.path()).await.unwrap().is_none());

        std::fs::create_dir(dir.path().join("a_dir")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("c.txt"), "c").unwrap();
        let first = first_output(dir.path()).await.unwrap().unwrap();
        assert_eq!(first.file_name().unwrap(), "b.txt");
        assert!(first.is_absolute());
    }
}
