//! Pixel-format and codec decoders that turn raw frame bytes reported
//! over the wire into RGB image buffers ready for preprocessing.

mod i420;
mod jpeg;
mod nv12;
mod rgb8;
mod yuv;

pub mod error;
pub mod frame;
pub mod registry;

pub use error::DecodeError;
pub use frame::RgbImage;
pub use registry::DecoderRegistry;
