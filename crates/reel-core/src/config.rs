//! Runtime knobs for the core services.
//!
//! reel-core never reads the environment; the binary builds a [`CoreConfig`]
//! from its own configuration and hands it over at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-task directory that holds derivative previews.
pub const PREVIEW_DIR_NAME: &str = "previews";
/// Name of the upload-side directory that holds file thumbnails.
pub const THUMBNAIL_DIR_NAME: &str = "thumbnails";
/// Image format used for thumbnails.
pub const THUMBNAIL_FORMAT: &str = "jpg";

/// On-disk layout for uploads, task outputs and their derivatives.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Storage location of an uploaded file's content.
    pub fn upload_path(&self, file_id: &str) -> PathBuf {
        self.upload_dir.join(file_id)
    }

    /// Working directory of a task; every output it writes lands here.
    pub fn task_output_dir(&self, task_id: &str) -> PathBuf {
        self.output_dir.join(task_id)
    }

    pub fn task_preview_dir(&self, task_id: &str) -> PathBuf {
        self.task_output_dir(task_id).join(PREVIEW_DIR_NAME)
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.upload_dir.join(THUMBNAIL_DIR_NAME)
    }

    pub fn thumbnail_path(&self, file_id: &str) -> PathBuf {
        self.thumbnail_dir()
            .join(format!("{file_id}.{THUMBNAIL_FORMAT}"))
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("./uploads", "./outputs")
    }
}

/// Clamp bounds for task listing.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default: u32,
    pub max: u32,
}

impl PageLimits {
    /// Resolve a requested page size into `[1, max]`, using the default when
    /// none was requested.
    pub fn clamp(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default).clamp(1, self.max.max(1))
    }
}

impl Default for PageLimits {
    fn default() -> Self {
        Self { default: 20, max: 50 }
    }
}

/// Thresholds for best-effort preview generation.
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Sources at or below this size never get a preview.
    pub small_file_threshold: u64,
    /// A video preview above this size triggers one more aggressive pass.
    pub size_ceiling: u64,
    /// Maximum number of bytes kept in a text preview.
    pub text_budget: usize,
    /// Bounding box for image previews.
    pub image_bounds: (u32, u32),
    /// Maximum width of generated thumbnails.
    pub thumbnail_width: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            small_file_threshold: 5 * 1024 * 1024,
            size_ceiling: 500 * 1024 * 1024,
            text_budget: 10 * 1024,
            image_bounds: (1920, 1080),
            thumbnail_width: 320,
        }
    }
}

/// Everything the core services need at startup.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub layout: StorageLayout,
    /// Bound of the executor submission queue.
    pub queue_capacity: usize,
    /// Maximum concurrently running external commands; `0` means unbounded.
    pub max_concurrent_tasks: usize,
    /// Expiry horizon stamped on new tasks.
    pub task_ttl: Duration,
    /// Expiry horizon stamped on new uploads.
    pub file_ttl: Duration,
    pub page_limits: PageLimits,
    pub preview: PreviewConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            queue_capacity: 64,
            max_concurrent_tasks: 4,
            task_ttl: Duration::from_secs(24 * 60 * 60),
            file_ttl: Duration::from_secs(24 * 60 * 60),
            page_limits: PageLimits::default(),
            preview: PreviewConfig::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn page_limits_clamp_into_range() {
        let limits = PageLimits { default: 20, max: 50 };
        assert_eq!(limits.clamp(None), 20);
        assert_eq!(limits.clamp(Some(0)), 1);
        assert_eq!(limits.clamp(Some(7)), 7);
        assert_eq!(limits.clamp(Some(500)), 50);
    }

    #[test]
    fn layout_keys_directories_by_id() {
        let layout = StorageLayout::new("/data/up", "/data/out");
        assert_eq!(layout.task_output_dir("t1"), PathBuf::from("/data/out/t1"));
        assert_eq!(
            layout.task_preview_dir("t1"),
            PathBuf::from("/data/out/t1/previews")
        );
        assert_eq!(
            layout.thumbnail_path("f1"),
            PathBuf::from("/data/up/thumbnails/f1.jpg")
        );
    }
}
