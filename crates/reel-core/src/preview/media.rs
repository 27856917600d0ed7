use std::path::Path;

use crate::config::PreviewConfig;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Mime types that get an upload-time thumbnail.
const THUMBNAIL_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/avif",
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Video,
    Audio,
    Image,
    Text,
    Other,
}

impl MediaClass {
    pub fn of(mime: &str) -> Self {
        match mime.split_once('/').map(|(top, _)| top) {
            Some("video") => MediaClass::Video,
            Some("audio") => MediaClass::Audio,
            Some("image") => MediaClass::Image,
            Some("text") => MediaClass::Text,
            _ => MediaClass::Other,
        }
    }
}

/// Sniff the content first, then fall back to the extension.
pub fn detect_mime(path: &Path) -> String {
    detect_mime_named(path, path)
}

/// Like [`detect_mime`], but guesses from `name` when sniffing fails. Used
/// for uploads, which are stored under their id without an extension.
pub fn detect_mime_named(path: &Path, name: impl AsRef<Path>) -> String {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => return kind.mime_type().to_owned(),
        Ok(None) => {}
        Err(e) => tracing::debug!(path = %path.display(), error = %e, "content sniffing failed"),
    }
    mime_guess::from_path(name)
        .first()
        .map(|m| m.essence_str().to_owned())
        .unwrap_or_else(|| OCTET_STREAM.to_owned())
}

pub fn supports_thumbnail(mime: &str) -> bool {
    THUMBNAIL_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(mime))
}

/// Small files and non-media types never get a preview.
pub fn should_generate_preview(mime: &str, size: u64, config: &PreviewConfig) -> bool {
    if size <= config.small_file_threshold {
        return false;
    }
    MediaClass::of(mime) != MediaClass::Other
}
