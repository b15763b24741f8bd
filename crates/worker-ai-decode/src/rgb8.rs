use crate::error::DecodeError;
use crate::frame::RgbImage;

/// RGB8: already in the target layout, just validated and copied.
pub fn decode(data: &[u8], width: u32, height: u32) -> Result<RgbImage, DecodeError> {
    let want = width as usize * height as usize * 3;
    if data.len() != want {
        return Err(DecodeError::SizeMismatch {
            width,
            height,
            got: data.len(),
            want_min: want,
        });
    }
    Ok(RgbImage::from_raw(width, height, data.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_exact_size() {
        assert!(decode(&[0u8; 47], 4, 4).is_err());
        assert!(decode(&[0u8; 48], 4, 4).is_ok());
    }
}
