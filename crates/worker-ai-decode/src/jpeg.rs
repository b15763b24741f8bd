use image::GenericImageView;

use crate::error::DecodeError;
use crate::frame::RgbImage;

/// JPEG: variable-length compressed data. Decoded size must match the
/// declared dimensions; a mismatch is reported rather than silently
/// resized, so callers see a consistent contract across runs.
pub fn decode(data: &[u8], width: u32, height: u32) -> Result<RgbImage, DecodeError> {
    let img = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|e| DecodeError::Jpeg(e.to_string()))?;

    let (decoded_w, decoded_h) = img.dimensions();
    if decoded_w != width || decoded_h != height {
        return Err(DecodeError::DimensionMismatch {
            width,
            height,
            decoded_w,
            decoded_h,
        });
    }

    let rgb = img.to_rgb8();
    Ok(RgbImage::from_raw(width, height, rgb.into_raw()))
}
