use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use tokio::process::Command;
use tokio::task;
use tracing::debug;

use super::plan::VideoPlan;
use super::PreviewError;

/// External encoder used for derivative artifacts.
#[async_trait]
pub trait Transcoder: Send + Sync + 'static {
    /// Container duration in seconds, `None` when the source does not say.
    async fn probe_duration(&self, source: &Path) -> Result<Option<f64>, PreviewError>;

    async fn encode_video(&self, source: &Path, output: &Path, plan: &VideoPlan) -> Result<(), PreviewError>;

    async fn encode_audio(&self, source: &Path, output: &Path, bitrate: &str) -> Result<(), PreviewError>;

    /// Scale an image down to at most `max_width`, keeping aspect ratio.
    async fn scale_image(&self, source: &Path, output: &Path, max_width: u32) -> Result<(), PreviewError>;

    /// Write the single frame at `at_secs`, scaled to `width`.
    async fn extract_frame(
        &self,
        source: &Path,
        output: &Path,
        at_secs: f64,
        width: u32,
    ) -> Result<(), PreviewError>;
}

/// [`Transcoder`] backed by the `ffmpeg`/`ffprobe` binaries on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self
    }

    /// Whether an `ffmpeg` binary can be launched at all.
    pub fn is_available() -> bool {
        ffmpeg_sidecar::command::ffmpeg_is_installed()
    }
}

fn path_arg(path: &Path) -> Result<String, PreviewError> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| PreviewError::Path(path.to_path_buf()))
}

/// Run ffmpeg on the blocking pool and fail on a non-zero exit.
async fn run_ffmpeg(
    pre_input: Vec<String>,
    input: PathBuf,
    args: Vec<String>,
    output: PathBuf,
) -> Result<(), PreviewError> {
    let input = path_arg(&input)?;
    let output = path_arg(&output)?;

    task::spawn_blocking(move || -> Result<(), PreviewError> {
        let mut command = FfmpegCommand::new();
        command
            .hide_banner()
            .overwrite()
            .args(&pre_input)
            .input(&input)
            .args(&args)
            .output(&output);

        let mut child = command
            .spawn()
            .map_err(|e| PreviewError::Ffmpeg(format!("failed to start ffmpeg: {e}")))?;
        let mut last_error: Option<String> = None;
        let events = child
            .iter()
            .map_err(|e| PreviewError::Ffmpeg(e.to_string()))?;
        for event in events {
            match event {
                FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg) | FfmpegEvent::Error(msg) => {
                    debug!(%msg, "ffmpeg error output");
                    last_error = Some(msg);
                }
                FfmpegEvent::Log(level, msg) => debug!("[FFmpeg {:?}] {}", level, msg),
                _ => {}
            }
        }

        let status = child.wait()?;
        if !status.success() {
            let reason = last_error.unwrap_or_else(|| format!("ffmpeg exited with {status}"));
            return Err(PreviewError::Ffmpeg(reason));
        }
        Ok(())
    })
    .await?
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| (*s).to_owned()).collect()
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe_duration(&self, source: &Path) -> Result<Option<f64>, PreviewError> {
        let output = Command::new(ffprobe_binary())
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(source)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(PreviewError::Ffmpeg(format!("ffprobe failed: {stderr}")));
        }
        Ok(parse_duration(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn encode_video(&self, source: &Path, output: &Path, plan: &VideoPlan) -> Result<(), PreviewError> {
        let mut args = Vec::new();
        if let Some(trim) = plan.trim_secs {
            args.extend(["-t".to_owned(), trim.to_string()]);
        }
        args.extend([
            "-vf".to_owned(),
            format!("scale={}:-2", plan.width),
            "-c:v".to_owned(),
            "libx264".to_owned(),
            "-crf".to_owned(),
            plan.crf.to_string(),
            "-preset".to_owned(),
            "medium".to_owned(),
            "-c:a".to_owned(),
            "aac".to_owned(),
            "-b:a".to_owned(),
            plan.audio_bitrate.to_owned(),
        ]);
        run_ffmpeg(Vec::new(), source.to_path_buf(), args, output.to_path_buf()).await
    }

    async fn encode_audio(&self, source: &Path, output: &Path, bitrate: &str) -> Result<(), PreviewError> {
        let args = strings(["-vn", "-c:a", "aac", "-b:a", bitrate]);
        run_ffmpeg(Vec::new(), source.to_path_buf(), args, output.to_path_buf()).await
    }

    async fn scale_image(&self, source: &Path, output: &Path, max_width: u32) -> Result<(), PreviewError> {
        let args = vec!["-vf".to_owned(), format!("scale='min({max_width},iw)':-2")];
        run_ffmpeg(Vec::new(), source.to_path_buf(), args, output.to_path_buf()).await
    }

    async fn extract_frame(
        &self,
        source: &Path,
        output: &Path,
        at_secs: f64,
        width: u32,
    ) -> Result<(), PreviewError> {
        let pre_input = vec!["-ss".to_owned(), format!("{at_secs:.3}")];
        let args = vec![
            "-frames:v".to_owned(),
            "1".to_owned(),
            "-vf".to_owned(),
            format!("scale='min({width},iw)':-2"),
        ];
        run_ffmpeg(pre_input, source.to_path_buf(), args, output.to_path_buf()).await
    }
}

/// ffprobe prints `N/A` for streams without a container duration.
fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Sidecar binary next to the executable when present, else `ffprobe` on `PATH`.
fn ffprobe_binary() -> PathBuf {
    ffmpeg_sidecar::ffprobe::ffprobe_path()
}
