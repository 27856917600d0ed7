use std::path::Path;

use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};

use super::PreviewError;

/// Shrink `source` into `bounds` (keeping aspect ratio, never enlarging) and
/// write it to `output` in the format implied by its extension.
pub fn resize_to_bounds(source: &Path, output: &Path, bounds: (u32, u32)) -> Result<(), PreviewError> {
    let img = ImageReader::open(source)?.with_guessed_format()?.decode()?;
    let (max_w, max_h) = bounds;
    let img = if img.width() > max_w || img.height() > max_h {
        img.resize(max_w, max_h, FilterType::Lanczos3)
    } else {
        img
    };

    let format = ImageFormat::from_path(output)?;
    if format == ImageFormat::Jpeg {
        // JPEG has no alpha channel.
        img.to_rgb8().save_with_format(output, format)?;
    } else {
        img.save_with_format(output, format)?;
    }
    Ok(())
}
