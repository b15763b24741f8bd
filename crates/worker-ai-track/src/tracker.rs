//! Per-connection IoU tracker with optional Kalman smoothing.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::iou::{iou_xyxy, BBoxXyxy};
use crate::track::{Smoothing, Track, TrackState};

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub match_thresh: f32,
    pub max_age: u64,
    pub min_hits: u32,
    pub use_kalman: bool,
    pub kalman_q: f32,
    pub kalman_r: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_thresh: 0.3,
            max_age: 30,
            min_hits: 3,
            use_kalman: true,
            kalman_q: 1e-2,
            kalman_r: 1e-1,
        }
    }
}

/// On-disk override for the subset of tuning knobs the tracker type's
/// config file may redefine; missing fields fall back to the defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TrackerConfigFile {
    match_thresh: Option<f32>,
    max_age: Option<u64>,
    min_hits: Option<u32>,
}

impl TrackerConfig {
    /// Loads overrides from `config_path`, falling back to defaults and
    /// logging a warning when the file is missing or unparsable, rather
    /// than failing the connection.
    pub fn load(config_path: Option<&Path>, use_kalman: bool) -> Self {
        let mut config = Self {
            use_kalman,
            ..Self::default()
        };

        let Some(path) = config_path else {
            return config;
        };

        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "tracker config file unreadable, using defaults");
                return config;
            }
        };

        match toml::from_str::<TrackerConfigFile>(&contents) {
            Ok(file) => {
                if let Some(v) = file.match_thresh {
                    config.match_thresh = v;
                }
                if let Some(v) = file.max_age {
                    config.max_age = v;
                }
                if let Some(v) = file.min_hits {
                    config.min_hits = v;
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "tracker config file unparsable, using defaults");
            }
        }

        config
    }
}

pub struct DetectionInput {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBoxXyxy,
}

pub struct Tracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
    frame_index: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            frame_index: 0,
        }
    }

    /// Clears all tracks and resets ID/frame counters, for a new session.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
        self.frame_index = 0;
    }

    pub fn active_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.state != TrackState::Deleted)
    }

    /// Runs one frame of predict -> associate -> update -> spawn -> age
    /// -> evict, returning the tracks updated this frame (matched or
    /// newly spawned), in track order.
    pub fn update(&mut self, detections: Vec<DetectionInput>) -> Vec<&Track> {
        self.frame_index += 1;
        let frame_index = self.frame_index;

        for track in &mut self.tracks {
            track.predict();
        }

        let original_len = self.tracks.len();
        let mut matched_track_indices = vec![false; original_len];
        let mut matched_detection_indices = vec![false; detections.len()];

        for (det_idx, det) in detections.iter().enumerate() {
            let mut best: Option<(usize, f32)> = None;
            for (track_idx, track) in self.tracks.iter().enumerate() {
                if matched_track_indices[track_idx] || track.class_id != det.class_id {
                    continue;
                }
                let iou = iou_xyxy(track.association_bbox(), det.bbox);
                if iou >= self.config.match_thresh {
                    match best {
                        Some((_, best_iou)) if best_iou >= iou => {}
                        _ => best = Some((track_idx, iou)),
                    }
                }
            }

            if let Some((track_idx, _)) = best {
                matched_track_indices[track_idx] = true;
                matched_detection_indices[det_idx] = true;
                self.tracks[track_idx].mark_matched(
                    det.bbox,
                    det.confidence,
                    frame_index,
                    self.config.min_hits,
                );
            }
        }

        // Age tracks that existed before this frame and went unmatched.
        for (track_idx, track) in self.tracks.iter_mut().enumerate().take(original_len) {
            if !matched_track_indices[track_idx] {
                track.mark_unmatched(self.config.max_age);
            }
        }

        // Spawn new tracks for unmatched detections.
        for (det_idx, det) in detections.into_iter().enumerate() {
            if matched_detection_indices[det_idx] {
                continue;
            }
            let track_id = self.next_id;
            self.next_id += 1;
            let track = Track::new(
                track_id,
                det.class_id,
                det.class_name,
                det.confidence,
                det.bbox,
                frame_index,
                self.config.use_kalman,
                self.config.kalman_q,
                self.config.kalman_r,
            );
            self.tracks.push(track);
        }

        let max_age = self.config.max_age;
        self.tracks
            .retain(|t| !t.should_evict(frame_index, max_age));

        self.tracks
            .iter()
            .filter(|t| t.last_seen_frame == frame_index)
            .collect()
    }

    pub fn smoothing_active(track: &Track) -> bool {
        matches!(track.smoothing, Smoothing::WithKalman { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BBoxXyxy {
        BBoxXyxy { x1, y1, x2, y2 }
    }

    #[test]
    fn spawns_new_track_for_unmatched_detection() {
        let mut tracker = Tracker::new(TrackerConfig {
            use_kalman: false,
            ..TrackerConfig::default()
        });
        let updated = tracker.update(vec![DetectionInput {
            class_id: 0,
            class_name: "person".into(),
            confidence: 0.9,
            bbox: bbox(0.1, 0.1, 0.2, 0.2),
        }]);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].track_id, 1);
    }

    #[test]
    fn track_ids_are_monotone_after_reset() {
        let mut tracker = Tracker::new(TrackerConfig {
            use_kalman: false,
            ..TrackerConfig::default()
        });
        tracker.update(vec![DetectionInput {
            class_id: 0,
            class_name: "person".into(),
            confidence: 0.9,
            bbox: bbox(0.1, 0.1, 0.2, 0.2),
        }]);
        tracker.reset();
        let updated = tracker.update(vec![DetectionInput {
            class_id: 0,
            class_name: "person".into(),
            confidence: 0.9,
            bbox: bbox(0.3, 0.3, 0.4, 0.4),
        }]);
        assert_eq!(updated[0].track_id, 1);
    }

    #[test]
    fn matches_same_class_overlapping_detection_to_existing_track() {
        let mut tracker = Tracker::new(TrackerConfig {
            use_kalman: false,
            ..TrackerConfig::default()
        });
        tracker.update(vec![DetectionInput {
            class_id: 0,
            class_name: "person".into(),
            confidence: 0.9,
            bbox: bbox(0.1, 0.1, 0.3, 0.3),
        }]);
        let updated = tracker.update(vec![DetectionInput {
            class_id: 0,
            class_name: "person".into(),
            confidence: 0.9,
            bbox: bbox(0.11, 0.11, 0.31, 0.31),
        }]);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].track_id, 1);
        assert_eq!(updated[0].hits, 2);
    }

    #[test]
    fn evicts_tracks_past_max_age() {
        let mut tracker = Tracker::new(TrackerConfig {
            use_kalman: false,
            max_age: 2,
            ..TrackerConfig::default()
        });
        tracker.update(vec![DetectionInput {
            class_id: 0,
            class_name: "person".into(),
            confidence: 0.9,
            bbox: bbox(0.1, 0.1, 0.2, 0.2),
        }]);
        for _ in 0..5 {
            tracker.update(vec![]);
        }
        assert_eq!(tracker.active_tracks().count(), 0);
    }
}
