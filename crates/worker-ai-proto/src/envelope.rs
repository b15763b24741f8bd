//! Wire schema: the envelope and its nested request/response types.
//!
//! Every type here derives `serde::{Serialize, Deserialize}` and is
//! encoded with `bincode` by [`crate::codec`]. Field and variant names
//! are stable; numeric discriminants are assigned by `bincode`'s default
//! enum encoding and only need to stay stable within one build.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgType {
    Unknown,
    Init,
    Frame,
    End,
    InitOk,
    WindowUpdate,
    Result,
    Error,
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Nv12,
    I420,
    Rgb8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    None,
    Jpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    LatestWins,
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    VersionUnsupported,
    BadMessage,
    BadSequence,
    UnsupportedFormat,
    InvalidFrame,
    FrameTooLarge,
    ModelNotReady,
    BackpressureTimeout,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitCapabilities {
    pub max_width: u32,
    pub max_height: u32,
    pub confidence_threshold: Option<f32>,
    pub classes_filter: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneDescriptor {
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Init {
        model_path: String,
        caps: InitCapabilities,
    },
    Frame {
        frame_id: u64,
        session_id: Option<String>,
        pixel_format: PixelFormat,
        codec: Codec,
        width: u32,
        height: u32,
        ts_mono_ns: Option<u64>,
        ts_utc_ns: Option<u64>,
        planes: Option<Vec<PlaneDescriptor>>,
        data: Vec<u8>,
    },
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChosenFormat {
    pub pixel_format: PixelFormat,
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub fps_target: f32,
    pub policy: Policy,
    pub initial_credits: u32,
    pub color_space: Option<String>,
    pub color_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRef {
    pub session_id: Option<String>,
    pub ts_mono_ns: Option<u64>,
    pub ts_utc_ns: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Latency {
    pub pre_ms: f32,
    pub infer_ms: f32,
    pub post_ms: f32,
    pub total_ms: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn is_normalized_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.x1)
            && (0.0..=1.0).contains(&self.y1)
            && (0.0..=1.0).contains(&self.x2)
            && (0.0..=1.0).contains(&self.y2)
            && self.x1 < self.x2
            && self.y1 < self.y2
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub conf: f32,
    pub cls: String,
    pub track_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    InitOk {
        chosen: ChosenFormat,
        max_frame_bytes: u32,
    },
    Result {
        frame_id: u64,
        frame_ref: FrameRef,
        model_name: String,
        model_version: String,
        latency: Latency,
        detections: Vec<Detection>,
    },
    WindowUpdate {
        new_window_size: u32,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    pub last_frame_id: u64,
    pub frames_rx: u64,
    pub results_tx: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Req(Request),
    Res(Response),
    Hb(Heartbeat),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub protocol_version: u32,
    pub msg_type: MsgType,
    pub stream_id: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(stream_id: impl Into<String>, msg_type: MsgType, payload: Payload) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            msg_type,
            stream_id: stream_id.into(),
            payload,
        }
    }

    /// `msg_type` must agree with the carried payload variant.
    pub fn variant_matches_type(&self) -> bool {
        matches!(
            (&self.msg_type, &self.payload),
            (MsgType::Init, Payload::Req(Request::Init { .. }))
                | (MsgType::Frame, Payload::Req(Request::Frame { .. }))
                | (MsgType::End, Payload::Req(Request::End))
                | (MsgType::InitOk, Payload::Res(Response::InitOk { .. }))
                | (MsgType::WindowUpdate, Payload::Res(Response::WindowUpdate { .. }))
                | (MsgType::Result, Payload::Res(Response::Result { .. }))
                | (MsgType::Error, Payload::Res(Response::Error { .. }))
                | (MsgType::Heartbeat, Payload::Hb(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_validity() {
        assert!(BBox {
            x1: 0.1,
            y1: 0.1,
            x2: 0.5,
            y2: 0.5
        }
        .is_normalized_valid());
        assert!(!BBox {
            x1: 0.5,
            y1: 0.1,
            x2: 0.1,
            y2: 0.5
        }
        .is_normalized_valid());
        assert!(!BBox {
            x1: -0.1,
            y1: 0.1,
            x2: 0.5,
            y2: 0.5
        }
        .is_normalized_valid());
    }

    #[test]
    fn variant_matches_type_accepts_aligned_pairs() {
        let env = Envelope::new("s1", MsgType::End, Payload::Req(Request::End));
        assert!(env.variant_matches_type());
    }

    #[test]
    fn variant_matches_type_rejects_mismatch() {
        let env = Envelope::new("s1", MsgType::Frame, Payload::Req(Request::End));
        assert!(!env.variant_matches_type());
    }
}
