use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported pixel_format/codec combination: {pixel_format:?}/{codec:?}")]
    UnsupportedFormat {
        pixel_format: worker_ai_proto::PixelFormat,
        codec: worker_ai_proto::WireCodec,
    },
    #[error("frame data size {got} is too small for {width}x{height} ({want_min} bytes required)")]
    SizeMismatch {
        width: u32,
        height: u32,
        got: usize,
        want_min: usize,
    },
    #[error("jpeg decode failed: {0}")]
    Jpeg(String),
    #[error("decoded dimensions {decoded_w}x{decoded_h} do not match declared {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        decoded_w: u32,
        decoded_h: u32,
    },
}
