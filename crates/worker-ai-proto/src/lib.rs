//! Wire envelope types, framing, and codec for the edge-agent-facing
//! protocol spoken by the worker AI server.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod framing;

pub use codec::Codec;
pub use envelope::{
    BBox, ChosenFormat, Codec as WireCodec, Detection, Envelope, ErrorCode, FrameRef, Heartbeat,
    InitCapabilities, Latency, MsgType, Payload, PixelFormat, PlaneDescriptor, Policy, Request,
    Response, PROTOCOL_VERSION,
};
pub use error::ProtoError;
pub use framing::{FrameReader, FrameWriter, FramingError, DEFAULT_MAX_FRAME_BYTES};
