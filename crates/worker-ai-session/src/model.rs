//! JSON-serialized shapes persisted under a session directory.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KfState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox_smooth: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox_pred: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMeta {
    pub age: u64,
    pub hits: u32,
    pub hit_streak: u32,
    pub time_since_update: u64,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjRecord {
    pub track_id: String,
    pub cls: usize,
    pub cls_name: String,
    pub conf: f32,
    pub bbox_xyxy: [f32; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kf_state: Option<KfState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_meta: Option<TrackMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub t_rel_s: f64,
    pub frame: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts_mono_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts_utc_ns: Option<u64>,
    pub objs: Vec<ObjRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSegment {
    pub i: u32,
    pub t0: f64,
    pub t1: f64,
    pub url: String,
    pub count: u64,
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub segment_duration_s: f64,
    pub segments: Vec<IndexSegment>,
    pub fps: f64,
    pub duration_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMeta {
    pub id: usize,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_ts_utc_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ts_utc_ns: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub session_id: String,
    pub device_id: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub frame_count: u64,
    pub fps: f64,
    pub video: VideoMeta,
    pub classes: Vec<ClassMeta>,
}
