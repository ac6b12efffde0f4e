use std::io::Cursor;

use image::ImageFormat;
use thiserror::Error;

/// Encoding of every processed image.
pub const PROCESSED_FORMAT: ImageFormat = ImageFormat::Png;
pub const PROCESSED_CONTENT_TYPE: &str = "image/png";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Image flipping failed: could not decode image: {0}")]
    Decode(image::ImageError),
    #[error("Image flipping failed: could not encode image: {0}")]
    Encode(image::ImageError),
}

/// Mirror an encoded image left-to-right and re-encode it as PNG.
pub fn flip_horizontal(data: &[u8]) -> Result<Vec<u8>, TransformError> {
    let img = image::load_from_memory(data).map_err(TransformError::Decode)?;
    let flipped = img.fliph();

    let mut out = Cursor::new(Vec::new());
    flipped
        .write_to(&mut out, PROCESSED_FORMAT)
        .map_err(TransformError::Encode)?;

    tracing::debug!(
        width = flipped.width(),
        height = flipped.height(),
        "Flipped image horizontally"
    );
    Ok(out.into_inner())
}
