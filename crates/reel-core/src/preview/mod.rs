//! Best-effort derivative artifacts.
//!
//! Task previews are produced after a task completes; file thumbnails after
//! an upload. Neither ever fails the caller: errors are logged and the
//! outcome is recorded as "no derivative".

pub mod media;
pub mod plan;
pub mod raster;
pub mod transcoder;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::config::{PreviewConfig, StorageLayout};
use crate::entities::{FileRecord, FileStore, TaskStore};

pub use media::{
    detect_mime, detect_mime_named, should_generate_preview, supports_thumbnail, MediaClass,
};
pub use plan::{plan_video, VideoPlan};
pub use transcoder::{FfmpegTranscoder, Transcoder};

const AUDIO_PREVIEW_BITRATE: &str = "128k";

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path is not valid UTF-8: {}", .0.display())]
    Path(PathBuf),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct PreviewGenerator {
    transcoder: Arc<dyn Transcoder>,
    layout: StorageLayout,
    config: PreviewConfig,
}

impl fmt::Debug for PreviewGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewGenerator")
            .field("layout", &self.layout)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PreviewGenerator {
    pub fn new(transcoder: Arc<dyn Transcoder>, layout: StorageLayout, config: PreviewConfig) -> Self {
        Self {
            transcoder,
            layout,
            config,
        }
    }

    /// Produce a preview of a completed task's result and record the outcome.
    ///
    /// The task is marked as "preview generated" whatever happens; the
    /// recorded path is `None` when no preview was produced.
    pub async fn generate_for_task<S: TaskStore>(
        &self,
        store: &S,
        task_id: &str,
        result_path: Option<&Path>,
    ) -> Option<PathBuf> {
        let outcome = match result_path {
            Some(source) => self.task_preview(task_id, source).await,
            None => Ok(None),
        };
        let preview = outcome.unwrap_or_else(|e| {
            warn!(task_id, error = %e, "preview generation failed");
            None
        });

        let recorded = preview.as_ref().map(|p| p.to_string_lossy().into_owned());
        match store.set_preview(task_id, recorded.as_deref()).await {
            Ok(true) => preview,
            Ok(false) => {
                debug!(task_id, "task no longer completed; preview not recorded");
                if matches!(store.get_task(task_id).await, Ok(None)) {
                    self.discard_task_dir(task_id).await;
                }
                None
            }
            Err(e) => {
                warn!(task_id, error = %e, "failed to record preview");
                preview
            }
        }
    }

    /// The task was deleted while its preview was being produced.
    async fn discard_task_dir(&self, task_id: &str) {
        let dir = self.layout.task_output_dir(task_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => info!(task_id, "task vanished; removed recreated output directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(task_id, error = %e, "failed to remove orphaned output directory"),
        }
    }

    async fn task_preview(&self, task_id: &str, source: &Path) -> Result<Option<PathBuf>, PreviewError> {
        let size = fs::metadata(source).await?.len();
        let mime = sniff(source).await?;
        if !should_generate_preview(&mime, size, &self.config) {
            debug!(task_id, %mime, size, "preview not warranted");
            return Ok(None);
        }

        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PreviewError::Path(source.to_path_buf()))?;
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);

        let dir = self.layout.task_preview_dir(task_id);
        fs::create_dir_all(&dir).await?;

        let output = match MediaClass::of(&mime) {
            MediaClass::Video => {
                let output = dir.join(format!("preview_{stem}.mp4"));
                self.video_preview(source, &output, size).await?;
                output
            }
            MediaClass::Audio => {
                let output = dir.join(format!("preview_{stem}.m4a"));
                self.transcoder
                    .encode_audio(source, &output, AUDIO_PREVIEW_BITRATE)
                    .await?;
                output
            }
            MediaClass::Image => {
                let output = dir.join(format!("preview_{name}"));
                self.image_derivative(source, &output, self.config.image_bounds)
                    .await?;
                output
            }
            MediaClass::Text => {
                let output = dir.join(format!("preview_{name}"));
                text_preview(source, &output, self.config.text_budget).await?;
                output
            }
            MediaClass::Other => return Ok(None),
        };

        info!(task_id, preview = %output.display(), %mime, "preview generated");
        Ok(Some(output))
    }

    async fn video_preview(&self, source: &Path, output: &Path, size: u64) -> Result<(), PreviewError> {
        let duration = self.transcoder.probe_duration(source).await.unwrap_or_else(|e| {
            debug!(source = %source.display(), error = %e, "could not probe duration");
            None
        });
        let plan = plan_video(duration, size);
        debug!(?duration, ?plan, "encoding video preview");
        self.transcoder.encode_video(source, output, &plan).await?;

        let produced = fs::metadata(output).await?.len();
        if produced > self.config.size_ceiling {
            let fallback = plan.fallback();
            warn!(produced, ceiling = self.config.size_ceiling, ?fallback, "preview too large; re-encoding once");
            self.transcoder.encode_video(source, output, &fallback).await?;
        }
        Ok(())
    }

    /// In-process resize first; ffmpeg when the format is not supported.
    async fn image_derivative(&self, source: &Path, output: &Path, bounds: (u32, u32)) -> Result<(), PreviewError> {
        let (src, out) = (source.to_path_buf(), output.to_path_buf());
        let primary = tokio::task::spawn_blocking(move || raster::resize_to_bounds(&src, &out, bounds)).await?;
        if let Err(e) = primary {
            debug!(source = %source.display(), error = %e, "in-process resize failed; falling back to ffmpeg");
            self.transcoder.scale_image(source, output, bounds.0).await?;
        }
        Ok(())
    }

    /// Generate and record an upload-time thumbnail. Unsupported types yield
    /// `None` without touching the store.
    pub async fn generate_thumbnail<S: FileStore>(&self, store: &S, file: &FileRecord) -> Option<PathBuf> {
        if !supports_thumbnail(&file.mime_type) {
            debug!(file_id = %file.id, mime = %file.mime_type, "no thumbnail for this type");
            return None;
        }
        let path = match self.thumbnail(file).await {
            Ok(path) => path,
            Err(e) => {
                warn!(file_id = %file.id, error = %e, "thumbnail generation failed");
                return None;
            }
        };

        let recorded = path.to_string_lossy();
        match store.set_thumbnail(&file.id, Some(&*recorded)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(file_id = %file.id, "file deleted before its thumbnail was recorded");
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(file_id = %file.id, error = %e, "failed to remove orphaned thumbnail");
                }
                return None;
            }
            Err(e) => warn!(file_id = %file.id, error = %e, "failed to record thumbnail"),
        }
        info!(file_id = %file.id, thumbnail = %path.display(), "thumbnail generated");
        Some(path)
    }

    async fn thumbnail(&self, file: &FileRecord) -> Result<PathBuf, PreviewError> {
        let source = file.absolute_path()?;
        let output = self.layout.thumbnail_path(&file.id);
        fs::create_dir_all(self.layout.thumbnail_dir()).await?;
        let width = self.config.thumbnail_width;

        if MediaClass::of(&file.mime_type) == MediaClass::Image {
            self.image_derivative(&source, &output, (width, width)).await?;
        } else {
            let seek = match self.transcoder.probe_duration(&source).await {
                Ok(Some(duration)) => duration / 2.0,
                Ok(None) => 0.0,
                Err(e) => {
                    debug!(file_id = %file.id, error = %e, "could not probe duration; using first frame");
                    0.0
                }
            };
            self.transcoder
                .extract_frame(&source, &output, seek, width)
                .await?;
        }

        if !fs::try_exists(&output).await? {
            return Err(PreviewError::Ffmpeg("no thumbnail was written".to_owned()));
        }
        Ok(output)
    }
}

async fn sniff(path: &Path) -> Result<String, PreviewError> {
    let path = path.to_path_buf();
    Ok(tokio::task::spawn_blocking(move || detect_mime(&path)).await?)
}

/// Copy the first `budget` bytes, cutting before a trailing partial UTF-8
/// sequence.
async fn text_preview(source: &Path, output: &Path, budget: usize) -> Result<(), PreviewError> {
    let file = fs::File::open(source).await?;
    let mut buf = Vec::with_capacity(budget);
    file.take(budget as u64).read_to_end(&mut buf).await?;

    let keep = match std::str::from_utf8(&buf) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => buf.len(),
    };
    fs::write(output, &buf[..keep]).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{PreviewError, Transcoder, VideoPlan};

    /// Records calls and writes placeholder outputs of configurable size.
    #[derive(Default)]
    pub struct FakeTranscoder {
        pub duration: Option<f64>,
        pub fail: bool,
        /// Sizes of successive video outputs; 1 KiB once exhausted.
        pub video_sizes: Mutex<VecDeque<u64>>,
        pub video_plans: Mutex<Vec<VideoPlan>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeTranscoder {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn write(&self, output: &Path, len: u64) -> Result<(), PreviewError> {
            if self.fail {
                return Err(PreviewError::Ffmpeg("simulated failure".into()));
            }
            let file = tokio::fs::File::create(output).await?;
            file.set_len(len).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn probe_duration(&self, _source: &Path) -> Result<Option<f64>, PreviewError> {
            self.record("probe".into());
            Ok(self.duration)
        }

        async fn encode_video(&self, _source: &Path, output: &Path, plan: &VideoPlan) -> Result<(), PreviewError> {
            self.record("video".into());
            self.video_plans.lock().unwrap().push(plan.clone());
            let len = self.video_sizes.lock().unwrap().pop_front().unwrap_or(1024);
            self.write(output, len).await
        }

        async fn encode_audio(&self, _source: &Path, output: &Path, bitrate: &str) -> Result<(), PreviewError> {
            self.record(format!("audio {bitrate}"));
            self.write(output, 1024).await
        }

        async fn scale_image(&self, _source: &Path, output: &Path, max_width: u32) -> Result<(), PreviewError> {
            self.record(format!("image {max_width}"));
            self.write(output, 1024).await
        }

        async fn extract_frame(
            &self,
            _source: &Path,
            output: &Path,
            at_secs: f64,
            width: u32,
        ) -> Result<(), PreviewError> {
            self.record(format!("frame {at_secs} {width}"));
            self.write(output, 1024).await
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::{Duration, Utc};
    use image::RgbImage;

    use super::test_support::FakeTranscoder;
    use super::*;
    use crate::entities::test_support::{file_record, memory_store};
    use crate::entities::SqliteStore;

    const MIB: u64 = 1024 * 1024;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: SqliteStore,
        fake: Arc<FakeTranscoder>,
        generator: PreviewGenerator,
    }

    async fn fixture(fake: FakeTranscoder) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let layout = StorageLayout::new(root.join("up"), root.join("out"));
        let fake = Arc::new(fake);
        let generator = PreviewGenerator::new(fake.clone(), layout, PreviewConfig::default());
        Fixture {
            _dir: dir,
            root,
            store: memory_store().await,
            fake,
            generator,
        }
    }

    async fn completed_task(store: &SqliteStore) -> String {
        let task = store
            .create_task("cmd", &[], Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        store.mark_processing(&task.id).await.unwrap();
        store.mark_completed(&task.id, None).await.unwrap();
        task.id
    }

    async fn sparse_file(path: &Path, len: u64) {
        let file = tokio::fs::File::create(path).await.unwrap();
        file.set_len(len).await.unwrap();
    }

    #[tokio::test]
    async fn small_output_is_marked_without_preview() {
        let f = fixture(FakeTranscoder::default()).await;
        let id = completed_task(&f.store).await;
        let source = f.root.join("clip.mp4");
        sparse_file(&source, 3 * MIB).await;

        let preview = f.generator.generate_for_task(&f.store, &id, Some(&source)).await;
        assert!(preview.is_none());
        assert!(f.fake.calls().is_empty());

        let task = f.store.get_task(&id).await.unwrap().unwrap();
        assert!(task.preview_generated);
        assert!(task.preview_path.is_none());
    }

    #[tokio::test]
    async fn long_large_video_uses_ten_minute_tier() {
        let f = fixture(FakeTranscoder {
            duration: Some(25.0 * 60.0),
            ..Default::default()
        })
        .await;
        let id = completed_task(&f.store).await;
        let source = f.root.join("talk.mp4");
        sparse_file(&source, 600 * MIB).await;

        let preview = f
            .generator
            .generate_for_task(&f.store, &id, Some(&source))
            .await
            .unwrap();
        assert!(preview.ends_with("previews/preview_talk.mp4"));

        let plans = f.fake.video_plans.lock().unwrap().clone();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].trim_secs, Some(600));

        let task = f.store.get_task(&id).await.unwrap().unwrap();
        assert!(task.preview_generated);
        assert_eq!(task.preview_path, Some(preview.to_string_lossy().into_owned()));
    }

    #[tokio::test]
    async fn oversized_preview_is_re_encoded_once() {
        let f = fixture(FakeTranscoder {
            duration: Some(25.0 * 60.0),
            video_sizes: Mutex::new(VecDeque::from([700 * MIB, 700 * MIB])),
            ..Default::default()
        })
        .await;
        let id = completed_task(&f.store).await;
        let source = f.root.join("talk.mp4");
        sparse_file(&source, 600 * MIB).await;

        f.generator.generate_for_task(&f.store, &id, Some(&source)).await;

        let plans = f.fake.video_plans.lock().unwrap().clone();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1], plans[0].fallback());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn failures_are_swallowed_and_recorded() {
        let f = fixture(FakeTranscoder {
            fail: true,
            ..Default::default()
        })
        .await;
        let id = completed_task(&f.store).await;
        let source = f.root.join("song.mp3");
        sparse_file(&source, 8 * MIB).await;

        let preview = f.generator.generate_for_task(&f.store, &id, Some(&source)).await;
        assert!(preview.is_none());
        assert!(logs_contain("preview generation failed"));

        let task = f.store.get_task(&id).await.unwrap().unwrap();
        assert!(task.preview_generated);
        assert!(task.preview_path.is_none());
    }

    #[tokio::test]
    async fn text_preview_is_truncated_to_budget() {
        let f = fixture(FakeTranscoder::default()).await;
        let id = completed_task(&f.store).await;
        let source = f.root.join("log.txt");
        tokio::fs::write(&source, "é".repeat(3 * 1024 * 1024)).await.unwrap();

        let preview = f
            .generator
            .generate_for_task(&f.store, &id, Some(&source))
            .await
            .unwrap();
        let text = tokio::fs::read_to_string(&preview).await.unwrap();
        assert_eq!(text.len(), 10 * 1024);
    }

    #[tokio::test]
    async fn missing_result_still_marks_attempt() {
        let f = fixture(FakeTranscoder::default()).await;
        let id = completed_task(&f.store).await;
        assert!(f.generator.generate_for_task(&f.store, &id, None).await.is_none());
        assert!(f.store.get_task(&id).await.unwrap().unwrap().preview_generated);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn deleted_task_leaves_no_preview_behind() {
        let f = fixture(FakeTranscoder::default()).await;
        let id = completed_task(&f.store).await;
        let source = f.root.join("clip.mp4");
        sparse_file(&source, 8 * MIB).await;
        assert!(f.store.delete_task(&id).await.unwrap());

        let preview = f.generator.generate_for_task(&f.store, &id, Some(&source)).await;
        assert!(preview.is_none());
        assert!(f.fake.calls().contains(&"video".to_owned()));
        assert!(!f.root.join("out").join(&id).exists());
        assert!(logs_contain("removed recreated output directory"));
    }

    #[tokio::test]
    async fn deleted_file_leaves_no_thumbnail_behind() {
        let f = fixture(FakeTranscoder {
            duration: Some(10.0),
            ..Default::default()
        })
        .await;
        let mut file = file_record("3f2b8a4e-9c1d-4e2f-8a7b-1c2d3e4f5a6b");
        file.file_path = f.root.join("movie").to_string_lossy().into_owned();

        assert!(f.generator.generate_thumbnail(&f.store, &file).await.is_none());
        assert!(f.fake.calls().contains(&"frame 5 320".to_owned()));
        assert!(!f.root.join("up/thumbnails").join(format!("{}.jpg", file.id)).exists());
    }

    #[tokio::test]
    async fn video_thumbnail_seeks_to_midpoint() {
        let f = fixture(FakeTranscoder {
            duration: Some(10.0),
            ..Default::default()
        })
        .await;
        let mut file = file_record("3f2b8a4e-9c1d-4e2f-8a7b-1c2d3e4f5a6b");
        file.file_path = f.root.join("movie").to_string_lossy().into_owned();
        f.store.insert_file(&file).await.unwrap();

        let thumb = f.generator.generate_thumbnail(&f.store, &file).await.unwrap();
        assert!(thumb.ends_with(format!("thumbnails/{}.jpg", file.id)));
        assert!(f.fake.calls().contains(&"frame 5 320".to_owned()));

        let stored = f.store.get_file(&file.id).await.unwrap().unwrap();
        assert_eq!(stored.thumbnail_path, Some(thumb.to_string_lossy().into_owned()));
    }

    #[tokio::test]
    async fn image_thumbnail_is_resized_in_process() {
        let f = fixture(FakeTranscoder::default()).await;
        let source = f.root.join("photo.png");
        RgbImage::new(640, 320).save(&source).unwrap();

        let mut file = file_record("01890a5d-ac96-774b-bcce-b302099a8057");
        file.file_path = source.to_string_lossy().into_owned();
        file.mime_type = "image/png".into();
        f.store.insert_file(&file).await.unwrap();

        let thumb = f.generator.generate_thumbnail(&f.store, &file).await.unwrap();
        let img = image::open(&thumb).unwrap();
        assert_eq!((img.width(), img.height()), (320, 160));
        assert!(f.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn unsupported_types_get_no_thumbnail() {
        let f = fixture(FakeTranscoder::default()).await;
        let mut file = file_record("01890a5d-ac96-774b-bcce-b302099a8057");
        file.mime_type = "audio/mpeg".into();
        assert!(f.generator.generate_thumbnail(&f.store, &file).await.is_none());
        assert!(f.fake.calls().is_empty());
    }
}
