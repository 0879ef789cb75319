//! PNG snapshots of readback buffers, for debugging captured content.

use crate::error::CaptureError;
use crate::frame::{flip_rows, BYTES_PER_PIXEL};
use image::{ImageFormat, RgbImage};
use std::path::Path;
use tracing::info;

/// Write a bottom-first RGB buffer to `path` as an upright PNG.
pub fn save_png(path: &Path, pixels: &[u8], width: u32, height: u32) -> Result<(), CaptureError> {
    let expected = width as usize * height as usize * BYTES_PER_PIXEL;
    if pixels.len() != expected {
        return Err(CaptureError::BufferSize {
            expected,
            actual: pixels.len(),
        });
    }

    let mut upright = vec![0u8; expected];
    flip_rows(pixels, &mut upright, width, height);

    let image = RgbImage::from_raw(width, height, upright).ok_or_else(|| {
        CaptureError::InvalidParameters(format!("cannot build {}x{} image", width, height))
    })?;
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| CaptureError::Io(std::io::Error::other(e.to_string())))?;

    info!("Saved snapshot to {:?}", path);
    Ok(())
}
