//! `{pixel_format, codec} -> decoder` lookup table, populated once at
//! startup and shared read-only across connections.

use std::collections::HashMap;

use worker_ai_proto::{PixelFormat, WireCodec};

use crate::error::DecodeError;
use crate::frame::RgbImage;
use crate::{i420, jpeg, nv12, rgb8};

type DecodeFn = fn(&[u8], u32, u32) -> Result<RgbImage, DecodeError>;

pub struct DecoderRegistry {
    decoders: HashMap<(PixelFormat, WireCodec), DecodeFn>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        let mut decoders: HashMap<(PixelFormat, WireCodec), DecodeFn> = HashMap::new();
        decoders.insert((PixelFormat::Nv12, WireCodec::None), nv12::decode);
        decoders.insert((PixelFormat::I420, WireCodec::None), i420::decode);
        decoders.insert((PixelFormat::Rgb8, WireCodec::None), rgb8::decode);
        // JPEG is self-describing; the declared pixel_format only
        // records what the source camera produced upstream.
        decoders.insert((PixelFormat::Nv12, WireCodec::Jpeg), jpeg::decode);
        decoders.insert((PixelFormat::I420, WireCodec::Jpeg), jpeg::decode);
        decoders.insert((PixelFormat::Rgb8, WireCodec::Jpeg), jpeg::decode);
        Self { decoders }
    }

    pub fn decode(
        &self,
        pixel_format: PixelFormat,
        codec: WireCodec,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<RgbImage, DecodeError> {
        let decode_fn = self.decoders.get(&(pixel_format, codec)).ok_or(
            DecodeError::UnsupportedFormat {
                pixel_format,
                codec,
            },
        )?;
        decode_fn(data, width, height)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
