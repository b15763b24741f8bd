//! Per-session segmented track persistence: append-only JSONL segments
//! plus atomically-updated `index.json`/`meta.json`.

pub mod error;
pub mod id;
pub mod model;
pub mod writer;

pub use error::SessionError;
pub use id::{derive_device_id, normalize_session_id};
pub use model::{ClassMeta, FrameRecord, Index, IndexSegment, KfState, Meta, ObjRecord, TrackMeta, VideoMeta};
pub use writer::SessionWriter;
