//! Per-session segmented JSONL persistence with atomically-updated
//! `index.json`/`meta.json`.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, TimeZone, Utc};
use tracing::warn;

use crate::error::SessionError;
use crate::id::{derive_device_id, normalize_session_id};
use crate::model::{ClassMeta, Index, IndexSegment, Meta, VideoMeta};

pub use crate::model::{FrameRecord, KfState, ObjRecord, TrackMeta};

fn atomic_json_dump<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), SessionError> {
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));
    let bytes = serde_json::to_vec_pretty(value)?;
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn ns_to_iso8601(ns: u64) -> String {
    let secs = (ns / 1_000_000_000) as i64;
    let nanos = (ns % 1_000_000_000) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct SessionWriter {
    root: PathBuf,
    session_id: String,
    device_id: String,
    segment_duration_s: f64,
    default_fps: f64,
    epoch_mono_ns: Option<u64>,
    epoch_utc_ns: Option<u64>,
    last_utc_ns: Option<u64>,
    start_time: Option<String>,
    video: VideoMeta,
    frame_count: u64,
    classes_seen: BTreeMap<usize, String>,
    segments: Vec<IndexSegment>,
    current_segment: Option<u32>,
}

impl SessionWriter {
    pub fn open(
        output_dir: &Path,
        raw_session_id: &str,
        segment_duration_s: f64,
        default_fps: f64,
        width: u32,
        height: u32,
    ) -> Result<Self, SessionError> {
        let session_id = normalize_session_id(raw_session_id)?;
        let device_id = derive_device_id(&session_id);
        let root = output_dir.join(&session_id);
        fs::create_dir_all(root.join("tracks"))?;

        Ok(Self {
            root,
            session_id,
            device_id,
            segment_duration_s,
            default_fps,
            epoch_mono_ns: None,
            epoch_utc_ns: None,
            last_utc_ns: None,
            start_time: None,
            video: VideoMeta {
                width,
                height,
                fps: default_fps,
                start_ts_utc_ns: None,
                end_ts_utc_ns: None,
            },
            frame_count: 0,
            classes_seen: BTreeMap::new(),
            segments: Vec::new(),
            current_segment: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn segment_path(&self, index: u32) -> PathBuf {
        self.root.join("tracks").join(format!("seg-{:04}.jsonl", index))
    }

    fn t_rel_for(&mut self, frame_id: u64, ts_mono_ns: Option<u64>, ts_utc_ns: Option<u64>) -> f64 {
        if self.epoch_mono_ns.is_none() && self.epoch_utc_ns.is_none() {
            if ts_mono_ns.is_some() || ts_utc_ns.is_some() {
                self.epoch_mono_ns = ts_mono_ns;
                self.epoch_utc_ns = ts_utc_ns;
                if let Some(utc) = ts_utc_ns {
                    self.start_time = Some(ns_to_iso8601(utc));
                    self.video.start_ts_utc_ns = Some(utc);
                }
            }
        }

        let t_rel = if let (Some(mono), Some(epoch)) = (ts_mono_ns, self.epoch_mono_ns) {
            (mono.saturating_sub(epoch)) as f64 / 1e9
        } else if let (Some(utc), Some(epoch)) = (ts_utc_ns, self.epoch_utc_ns) {
            (utc.saturating_sub(epoch)) as f64 / 1e9
        } else {
            frame_id as f64 / self.default_fps.max(1e-6)
        };

        t_rel.max(0.0)
    }

    fn ensure_segment(&mut self, index: u32, t_rel: f64) {
        if self.current_segment == Some(index) {
            return;
        }
        if let Some(prev) = self.current_segment {
            self.close_segment(prev);
        }
        if !self.segments.iter().any(|s| s.i == index) {
            let t0 = index as f64 * self.segment_duration_s;
            let t1 = t0 + self.segment_duration_s;
            self.segments.push(IndexSegment {
                i: index,
                t0,
                t1,
                url: format!("tracks/seg-{:04}.jsonl", index),
                count: 0,
                closed: false,
            });
        }
        self.current_segment = Some(index);
        let _ = t_rel;
    }

    fn close_segment(&mut self, index: u32) {
        if let Some(seg) = self.segments.iter_mut().find(|s| s.i == index) {
            seg.closed = true;
        }
    }

    /// Appends one frame's track records, rotating segments as needed,
    /// then atomically rewrites `index.json` and `meta.json`. No-op if
    /// `objs` is empty — writes are only triggered for frames with at
    /// least one active track.
    pub fn write_frame(
        &mut self,
        frame_id: u64,
        ts_mono_ns: Option<u64>,
        ts_utc_ns: Option<u64>,
        objs: Vec<ObjRecord>,
    ) -> Result<(), SessionError> {
        if objs.is_empty() {
            return Ok(());
        }

        let t_rel = self.t_rel_for(frame_id, ts_mono_ns, ts_utc_ns);
        let segment_index = (t_rel / self.segment_duration_s).floor().max(0.0) as u32;
        self.ensure_segment(segment_index, t_rel);

        for obj in &objs {
            self.classes_seen.insert(obj.cls, obj.cls_name.clone());
        }

        let record = FrameRecord {
            t_rel_s: round3(t_rel),
            frame: frame_id,
            ts_mono_ns,
            ts_utc_ns,
            objs,
        };
        let line = serde_json::to_string(&record)?;

        let path = self.segment_path(segment_index);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;

        if let Some(seg) = self.segments.iter_mut().find(|s| s.i == segment_index) {
            seg.count += 1;
        }
        self.frame_count += 1;
        if let Some(utc) = ts_utc_ns {
            self.last_utc_ns = Some(utc);
            self.video.end_ts_utc_ns = Some(utc);
        }

        self.rewrite_index_and_meta(None)
    }

    fn rewrite_index_and_meta(&self, end_time: Option<String>) -> Result<(), SessionError> {
        let duration_s = self
            .segments
            .iter()
            .map(|s| s.t1)
            .fold(0.0_f64, f64::max);

        let index = Index {
            segment_duration_s: self.segment_duration_s,
            segments: self.segments.clone(),
            fps: self.default_fps,
            duration_s,
        };
        atomic_json_dump(&self.root.join("index.json"), &index)?;

        let meta = Meta {
            session_id: self.session_id.clone(),
            device_id: self.device_id.clone(),
            start_time: self
                .start_time
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            end_time,
            frame_count: self.frame_count,
            fps: self.default_fps,
            video: self.video.clone(),
            classes: self
                .classes_seen
                .iter()
                .map(|(id, name)| ClassMeta {
                    id: *id,
                    name: name.clone(),
                })
                .collect(),
        };
        atomic_json_dump(&self.root.join("meta.json"), &meta)?;

        Ok(())
    }

    /// Closes the current segment and rewrites index/meta one last
    /// time. Idempotent, and tolerant of an already-removed session
    /// directory (a peer-initiated close must never corrupt files).
    pub fn finalize(&mut self) -> Result<(), SessionError> {
        if let Some(idx) = self.current_segment {
            self.close_segment(idx);
        }

        let end_time = self
            .last_utc_ns
            .map(ns_to_iso8601)
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));

        if !self.root.exists() {
            warn!(session_id = %self.session_id, "session directory missing at finalize, skipping index/meta rewrite");
            return Ok(());
        }

        self.rewrite_index_and_meta(Some(end_time))
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(track_id: &str, cls: usize) -> ObjRecord {
        ObjRecord {
            track_id: track_id.to_string(),
            cls,
            cls_name: "person".to_string(),
            conf: 0.9,
            bbox_xyxy: [0.1, 0.1, 0.2, 0.2],
            kf_state: None,
            track_meta: None,
        }
    }

    #[test]
    fn no_write_for_frame_with_no_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            SessionWriter::open(dir.path(), "cam_dev1_20260101", 10.0, 10.0, 640, 480).unwrap();
        writer.write_frame(0, None, None, vec![]).unwrap();
        assert!(!writer.root.join("index.json").exists());
    }

    #[test]
    fn segments_rotate_by_time_base_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            SessionWriter::open(dir.path(), "cam_dev1_20260101", 10.0, 10.0, 640, 480).unwrap();

        for frame_id in 0..250u64 {
            writer
                .write_frame(frame_id, None, None, vec![obj("det-0", 0)])
                .unwrap();
        }

        assert!(writer.segment_path(0).exists());
        assert!(writer.segment_path(1).exists());
        assert!(writer.segment_path(2).exists());

        let total: u64 = writer.segments.iter().map(|s| s.count).sum();
        assert_eq!(total, 250);

        let seg0 = writer.segments.iter().find(|s| s.i == 0).unwrap();
        assert!(seg0.closed);
    }

    #[test]
    fn finalize_is_idempotent_and_tolerates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            SessionWriter::open(dir.path(), "cam_dev1_20260101", 10.0, 10.0, 640, 480).unwrap();
        writer
            .write_frame(0, None, None, vec![obj("det-0", 0)])
            .unwrap();
        writer.finalize().unwrap();
        writer.finalize().unwrap();

        std::fs::remove_dir_all(&writer.root).unwrap();
        assert!(writer.finalize().is_ok());
    }

    #[test]
    fn device_id_is_derived_from_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let writer =
            SessionWriter::open(dir.path(), "cam_device7_20260101", 10.0, 10.0, 640, 480).unwrap();
        assert_eq!(writer.device_id, "device7");
    }
}
