//! A single tracked object and its lifecycle bookkeeping.

use crate::iou::BBoxXyxy;
use crate::kalman::KalmanBBoxFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Tentative,
    Confirmed,
    Deleted,
}

/// Either a bare smoothed bbox, or a full Kalman state with predicted
/// and smoothed boxes plus velocity.
#[derive(Debug, Clone)]
pub enum Smoothing {
    RawOnly,
    WithKalman {
        filter: Box<KalmanBBoxFilter>,
        predicted_bbox: [f32; 4],
    },
}

#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: u64,
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBoxXyxy,
    pub smoothing: Smoothing,
    pub age: u64,
    pub hits: u32,
    pub hit_streak: u32,
    pub time_since_update: u64,
    pub state: TrackState,
    pub last_seen_frame: u64,
}

impl Track {
    pub fn new(
        track_id: u64,
        class_id: usize,
        class_name: String,
        confidence: f32,
        bbox: BBoxXyxy,
        frame_index: u64,
        use_kalman: bool,
        q: f32,
        r: f32,
    ) -> Self {
        let smoothing = if use_kalman {
            let cx = (bbox.x1 + bbox.x2) / 2.0;
            let cy = (bbox.y1 + bbox.y2) / 2.0;
            let w = (bbox.x2 - bbox.x1).max(1e-3);
            let h = (bbox.y2 - bbox.y1).max(1e-3);
            Smoothing::WithKalman {
                filter: Box::new(KalmanBBoxFilter::new(cx, cy, w, h, q, r)),
                predicted_bbox: [bbox.x1, bbox.y1, bbox.x2, bbox.y2],
            }
        } else {
            Smoothing::RawOnly
        };

        Self {
            track_id,
            class_id,
            class_name,
            confidence,
            bbox,
            smoothing,
            age: 0,
            hits: 1,
            hit_streak: 1,
            time_since_update: 0,
            state: TrackState::Tentative,
            last_seen_frame: frame_index,
        }
    }

    /// The bbox used for association: predicted (post-Kalman-predict)
    /// if smoothing is active, otherwise the last raw detection bbox.
    pub fn association_bbox(&self) -> BBoxXyxy {
        match &self.smoothing {
            Smoothing::RawOnly => self.bbox,
            Smoothing::WithKalman { predicted_bbox, .. } => BBoxXyxy {
                x1: predicted_bbox[0],
                y1: predicted_bbox[1],
                x2: predicted_bbox[2],
                y2: predicted_bbox[3],
            },
        }
    }

    pub fn predict(&mut self) {
        if let Smoothing::WithKalman {
            filter,
            predicted_bbox,
        } = &mut self.smoothing
        {
            filter.predict();
            *predicted_bbox = filter.bbox_xyxy();
        }
    }

    pub fn mark_matched(
        &mut self,
        detection_bbox: BBoxXyxy,
        confidence: f32,
        frame_index: u64,
        min_hits: u32,
    ) {
        match &mut self.smoothing {
            Smoothing::RawOnly => {
                self.bbox = detection_bbox;
            }
            Smoothing::WithKalman { filter, .. } => {
                let cx = (detection_bbox.x1 + detection_bbox.x2) / 2.0;
                let cy = (detection_bbox.y1 + detection_bbox.y2) / 2.0;
                let w = (detection_bbox.x2 - detection_bbox.x1).max(1e-3);
                let h = (detection_bbox.y2 - detection_bbox.y1).max(1e-3);
                filter.update([cx, cy, w, h]);
                self.bbox = BBoxXyxy {
                    x1: filter.bbox_xyxy()[0],
                    y1: filter.bbox_xyxy()[1],
                    x2: filter.bbox_xyxy()[2],
                    y2: filter.bbox_xyxy()[3],
                };
            }
        }
        self.confidence = confidence;
        self.hits += 1;
        self.hit_streak += 1;
        self.time_since_update = 0;
        self.last_seen_frame = frame_index;
        if self.hits >= min_hits {
            self.state = TrackState::Confirmed;
        }
    }

    pub fn mark_unmatched(&mut self, max_age: u64) {
        self.hit_streak = 0;
        self.time_since_update += 1;
        self.age += 1;
        if self.time_since_update > max_age / 3 {
            self.state = TrackState::Tentative;
        }
    }

    pub fn should_evict(&self, frame_index: u64, max_age: u64) -> bool {
        frame_index.saturating_sub(self.last_seen_frame) > max_age
    }
}
