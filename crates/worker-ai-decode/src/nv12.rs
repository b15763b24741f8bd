use crate::error::DecodeError;
use crate::frame::RgbImage;
use crate::yuv::yuv_to_rgb;

/// NV12: Y plane followed by an interleaved U/V plane at half resolution.
pub fn decode(data: &[u8], width: u32, height: u32) -> Result<RgbImage, DecodeError> {
    let w = width as usize;
    let h = height as usize;
    let y_size = w * h;
    let uv_size = w * h / 2;
    let want_min = y_size + uv_size;

    if data.len() < want_min {
        return Err(DecodeError::SizeMismatch {
            width,
            height,
            got: data.len(),
            want_min,
        });
    }

    let y_plane = &data[..y_size];
    let uv_plane = &data[y_size..y_size + uv_size];

    let mut out = vec![0u8; w * h * 3];
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col];
            let uv_row = row / 2;
            let uv_col = col / 2;
            let uv_idx = (uv_row * (w / 2) + uv_col) * 2;
            let u = uv_plane[uv_idx];
            let v = uv_plane[uv_idx + 1];
            let rgb = yuv_to_rgb(y, u, v);
            let out_idx = (row * w + col) * 3;
            out[out_idx..out_idx + 3].copy_from_slice(&rgb);
        }
    }

    Ok(RgbImage::from_raw(width, height, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_buffer() {
        let err = decode(&[0u8; 10], 4, 4).unwrap_err();
        assert!(matches!(err, DecodeError::SizeMismatch { .. }));
    }

    #[test]
    fn decodes_flat_gray_frame() {
        let w = 4u32;
        let h = 4u32;
        let mut data = vec![128u8; (w * h) as usize];
        data.extend(std::iter::repeat(128u8).take((w * h / 2) as usize));
        let img = decode(&data, w, h).unwrap();
        assert_eq!(img.width(), w);
        assert_eq!(img.height(), h);
        assert_eq!(img.pixel(0, 0), [128, 128, 128]);
    }
}
