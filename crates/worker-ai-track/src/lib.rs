//! Per-connection IoU multi-object tracker with optional 8-D Kalman
//! smoothing.

pub mod iou;
pub mod kalman;
pub mod track;
pub mod tracker;

pub use iou::{iou_xyxy, BBoxXyxy};
pub use kalman::KalmanBBoxFilter;
pub use track::{Smoothing, Track, TrackState};
pub use tracker::{DetectionInput, Tracker, TrackerConfig};
