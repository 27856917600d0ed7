//! Expiry-driven cleanup of uploads and task outputs.

use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::StorageLayout;
use crate::entities::{FileRecord, FileStore, TaskRecord, TaskStore};
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_removed: usize,
    pub tasks_removed: usize,
    pub failures: usize,
}

pub struct RetentionSweep<S> {
    store: S,
    layout: StorageLayout,
    interval: Duration,
}

impl<S> RetentionSweep<S>
where
    S: TaskStore + FileStore + Clone,
{
    pub fn new(store: S, layout: StorageLayout, interval: Duration) -> Self {
        Self {
            store,
            layout,
            interval,
        }
    }

    /// One pass: expired files first, then expired tasks left without any
    /// file. A failing item is logged and counted; the pass continues.
    pub async fn run_once(&self) -> SweepReport {
        let now = Utc::now();
        let mut report = SweepReport::default();

        match self.store.expired_files(now).await {
            Ok(files) => {
                for file in files {
                    match self.remove_file(&file).await {
                        Ok(()) => report.files_removed += 1,
                        Err(e) => {
                            warn!(file_id = %file.id, error = %e, "failed to remove expired file");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to list expired files");
                report.failures += 1;
            }
        }

        match self.store.expired_orphan_tasks(now).await {
            Ok(tasks) => {
                for task in tasks {
                    match self.remove_task(&task).await {
                        Ok(()) => report.tasks_removed += 1,
                        Err(e) => {
                            warn!(task_id = %task.id, error = %e, "failed to remove expired task");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to list expired tasks");
                report.failures += 1;
            }
        }

        report
    }

    async fn remove_file(&self, file: &FileRecord) -> Result<()> {
        remove_path(Path::new(&file.file_path)).await?;
        match &file.thumbnail_path {
            Some(thumb) => remove_path(Path::new(thumb)).await?,
            None => remove_path(&self.layout.thumbnail_path(&file.id)).await?,
        }
        self.store.delete_file(&file.id).await?;
        debug!(file_id = %file.id, "expired file removed");
        Ok(())
    }

    async fn remove_task(&self, task: &TaskRecord) -> Result<()> {
        remove_tree(&self.layout.task_output_dir(&task.id)).await?;
        if let Some(preview) = &task.preview_path {
            remove_path(Path::new(preview)).await?;
        }
        self.store.delete_task(&task.id).await?;
        debug!(task_id = %task.id, "expired task removed");
        Ok(())
    }

    /// Run now, then every interval, until the handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                let report = self.run_once().await;
                info!(
                    files_removed = report.files_removed,
                    tasks_removed = report.tasks_removed,
                    failures = report.failures,
                    "retention sweep finished"
                );
            }
        })
    }
}

/// Missing content counts as removed.
async fn remove_path(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
