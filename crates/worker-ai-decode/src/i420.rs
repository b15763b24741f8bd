use crate::error::DecodeError;
use crate::frame::RgbImage;
use crate::yuv::yuv_to_rgb;

/// I420: Y plane, then a full-res-quarter U plane, then a V plane.
pub fn decode(data: &[u8], width: u32, height: u32) -> Result<RgbImage, DecodeError> {
    let w = width as usize;
    let h = height as usize;
    let y_size = w * h;
    let c_size = (w / 2) * (h / 2);
    let want_min = y_size + 2 * c_size;

    if data.len() < want_min {
        return Err(DecodeError::SizeMismatch {
            width,
            height,
            got: data.len(),
            want_min,
        });
    }

    let y_plane = &data[..y_size];
    let u_plane = &data[y_size..y_size + c_size];
    let v_plane = &data[y_size + c_size..y_size + 2 * c_size];

    let mut out = vec![0u8; w * h * 3];
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col];
            let c_row = row / 2;
            let c_col = col / 2;
            let c_idx = c_row * (w / 2) + c_col;
            let u = u_plane[c_idx];
            let v = v_plane[c_idx];
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
        data.extend(std::iter::repeat(128u8).take((w * h / 4) as usize * 2));
        let img = decode(&data, w, h).unwrap();
        assert_eq!(img.pixel(2, 2), [128, 128, 128]);
    }
}
