//! Image encoding: rasterised page → PNG bytes for an image work unit.
//!
//! PNG is lossless; JPEG artefacts around the thin strokes and dots of
//! Nastaliq script measurably hurt recognition. Base64 wrapping happens at
//! the backend edge, so units carry raw bytes and snapshots never see them.

use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Media type of every rendered page.
pub const PNG_MEDIA_TYPE: &str = "image/png";

/// Encode a rasterised page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded page image → {} bytes PNG", buf.len());
    Ok(buf)
}
