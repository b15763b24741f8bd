//! A single loaded ONNX detection model: letterbox preprocessing,
//! session run, postprocessing, and NMS.

use std::path::Path;

use ndarray::{Array, Array4, Axis};
use ort::{GraphOptimizationLevel, Session};
use tracing::warn;
use worker_ai_decode::RgbImage;

use crate::catalog::ClassCatalog;
use crate::error::InferenceError;

/// Padding value used for letterbox borders, matching the neutral gray
/// the exported models were calibrated against.
const LETTERBOX_PAD_VALUE: u8 = 114;

#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_w: f32,
    pad_h: f32,
}

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub conf: f32,
    pub class_id: usize,
}

enum Backend {
    Onnx(Session),
    #[cfg(feature = "test-util")]
    Stub {
        detections: Vec<RawDetection>,
        delay: std::time::Duration,
    },
}

pub struct Model {
    backend: Backend,
    input_name: String,
    input_size: u32,
    embedded_nms: bool,
}

impl Model {
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        let session = Session::builder()
            .map_err(InferenceError::Session)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(InferenceError::Session)?
            .commit_from_file(path)
            .map_err(|source| InferenceError::Load {
                path: path.display().to_string(),
                source,
            })?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| InferenceError::BadOutputShape("model has no inputs".into()))?;
        let input_name = input.name.clone();
        let input_size = probe_input_size(&input.input_type).unwrap_or(640);

        let embedded_nms = session
            .outputs
            .first()
            .map(|o| output_implies_embedded_nms(&o.output_type))
            .unwrap_or(false);

        Ok(Self {
            backend: Backend::Onnx(session),
            input_name,
            input_size,
            embedded_nms,
        })
    }

    /// A model that skips ONNX Runtime entirely and hands `infer` a fixed
    /// detection list, filtered by confidence/class like a real model's
    /// output would be. `delay` optionally pads `infer` with a blocking
    /// sleep, to emulate real inference latency in timing-sensitive
    /// tests (e.g. a backpressure window). Lets end-to-end tests drive a
    /// connection to `Ready` without a real model file on disk.
    #[cfg(feature = "test-util")]
    pub fn stub(
        input_size: u32,
        embedded_nms: bool,
        detections: Vec<RawDetection>,
        delay: std::time::Duration,
    ) -> Self {
        Self {
            backend: Backend::Stub { detections, delay },
            input_name: String::new(),
            input_size,
            embedded_nms,
        }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn embedded_nms(&self) -> bool {
        self.embedded_nms
    }

    /// Runs the full preprocess -> inference -> postprocess -> NMS
    /// pipeline against a decoded frame, returning detections with
    /// bboxes normalized to `[0, 1]` in the original frame's space.
    pub fn infer(
        &self,
        image: &RgbImage,
        conf_threshold: f32,
        nms_iou: f32,
        classes_filter: Option<&[usize]>,
        catalog: &ClassCatalog,
    ) -> Result<Vec<RawDetection>, InferenceError> {
        let session = match &self.backend {
            Backend::Onnx(session) => session,
            #[cfg(feature = "test-util")]
            Backend::Stub { detections, delay } => {
                if !delay.is_zero() {
                    std::thread::sleep(*delay);
                }
                return Ok(detections
                    .iter()
                    .cloned()
                    .filter(|d| d.conf >= conf_threshold)
                    .filter(|d| classes_filter.map(|f| f.contains(&d.class_id)).unwrap_or(true))
                    .collect());
            }
        };

        let (tensor, letterbox) = letterbox_preprocess(image, self.input_size);

        let input_value = ort::Value::from_array(tensor).map_err(InferenceError::Session)?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_value].map_err(InferenceError::Session)?)
            .map_err(InferenceError::Session)?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| InferenceError::BadOutputShape("model produced no outputs".into()))?
            .1;
        let array = output
            .try_extract_tensor::<f32>()
            .map_err(InferenceError::Session)?;

        let raw = if self.embedded_nms {
            parse_embedded_nms_output(&array.view())?
        } else {
            parse_raw_output(&array.view(), catalog.len())?
        };

        let filtered = postprocess(
            raw,
            letterbox,
            image.width(),
            image.height(),
            conf_threshold,
            classes_filter,
            catalog.len(),
        );

        let result = if self.embedded_nms {
            filtered
        } else {
            nms(filtered, nms_iou)
        };

        Ok(normalize_boxes(result, image.width(), image.height()))
    }
}

fn probe_input_size(input_type: &ort::ValueType) -> Option<u32> {
    if let ort::ValueType::Tensor { dimensions, .. } = input_type {
        // NCHW; height and width are the trailing two dims when concrete.
        if dimensions.len() == 4 {
            let h = dimensions[2];
            let w = dimensions[3];
            if h > 0 && w > 0 && h == w {
                return Some(h as u32);
            }
        }
    }
    None
}

fn output_implies_embedded_nms(output_type: &ort::ValueType) -> bool {
    if let ort::ValueType::Tensor { dimensions, .. } = output_type {
        // (1, N, 6): last dim of 6 columns signals embedded NMS output.
        return dimensions.len() == 3 && dimensions[2] == 6;
    }
    false
}

fn letterbox_preprocess(image: &RgbImage, target: u32) -> (Array4<f32>, LetterboxInfo) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let s = target as f32;
    let scale = (s / w).min(s / h);
    let new_w = (w * scale).round() as u32;
    let new_h = (h * scale).round() as u32;
    let pad_w = ((target - new_w) / 2) as f32;
    let pad_h = ((target - new_h) / 2) as f32;

    let mut canvas = vec![LETTERBOX_PAD_VALUE; (target * target * 3) as usize];
    resize_nearest_into(image, new_w, new_h, target, pad_w as u32, pad_h as u32, &mut canvas);

    let mut tensor = Array::zeros((1, 3, target as usize, target as usize));
    for y in 0..target as usize {
        for x in 0..target as usize {
            let idx = (y * target as usize + x) * 3;
            for c in 0..3 {
                tensor[[0, c, y, x]] = canvas[idx + c] as f32 / 255.0;
            }
        }
    }

    (
        tensor,
        LetterboxInfo {
            scale,
            pad_w,
            pad_h,
        },
    )
}

#[allow(clippy::too_many_arguments)]
fn resize_nearest_into(
    image: &RgbImage,
    new_w: u32,
    new_h: u32,
    target: u32,
    pad_x: u32,
    pad_y: u32,
    canvas: &mut [u8],
) {
    if new_w == 0 || new_h == 0 {
        return;
    }
    for y in 0..new_h {
        let src_y = (y as u64 * image.height() as u64 / new_h as u64) as u32;
        for x in 0..new_w {
            let src_x = (x as u64 * image.width() as u64 / new_w as u64) as u32;
            let px = image.pixel(src_x.min(image.width() - 1), src_y.min(image.height() - 1));
            let dst_x = x + pad_x;
            let dst_y = y + pad_y;
            let idx = ((dst_y * target + dst_x) * 3) as usize;
            canvas[idx..idx + 3].copy_from_slice(&px);
        }
    }
}

fn parse_embedded_nms_output(
    array: &ndarray::ArrayViewD<f32>,
) -> Result<Vec<RawDetection>, InferenceError> {
    let shape = array.shape();
    if shape.len() != 3 || shape[2] != 6 {
        return Err(InferenceError::BadOutputShape(format!("{:?}", shape)));
    }
    let mut dets = Vec::with_capacity(shape[1]);
    for row in array.index_axis(Axis(0), 0).outer_iter() {
        let (x1, y1, x2, y2, conf, class) = (row[0], row[1], row[2], row[3], row[4], row[5]);
        dets.push(RawDetection {
            x1,
            y1,
            x2,
            y2,
            conf,
            class_id: class.round().max(0.0) as usize,
        });
    }
    Ok(dets)
}

fn parse_raw_output(
    array: &ndarray::ArrayViewD<f32>,
    num_classes: usize,
) -> Result<Vec<RawDetection>, InferenceError> {
    let shape = array.shape().to_vec();
    if shape.len() != 3 {
        return Err(InferenceError::BadOutputShape(format!("{:?}", shape)));
    }

    // Accept either (1, 4+C, K) or its transpose (1, K, 4+C); normalize
    // to rows-are-detections.
    let rows_are_detections_last = shape[2] == 4 + num_classes;
    let rows_are_detections_mid = shape[1] == 4 + num_classes;

    let mut dets = Vec::new();

    if rows_are_detections_last {
        for row in array.index_axis(Axis(0), 0).outer_iter() {
            if let Some(d) = row_to_detection(row.as_slice().unwrap_or(&[]), num_classes) {
                dets.push(d);
            }
        }
    } else if rows_are_detections_mid {
        let view = array.index_axis(Axis(0), 0);
        let k = shape[2];
        for col in 0..k {
            let row: Vec<f32> = view.column(col).to_vec();
            if let Some(d) = row_to_detection(&row, num_classes) {
                dets.push(d);
            }
        }
    } else {
        return Err(InferenceError::BadOutputShape(format!("{:?}", shape)));
    }

    Ok(dets)
}

fn row_to_detection(row: &[f32], num_classes: usize) -> Option<RawDetection> {
    if row.len() < 4 + num_classes {
        return None;
    }
    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    let scores = &row[4..4 + num_classes];

    let needs_sigmoid = scores.iter().any(|&s| !(0.0..=1.0).contains(&s));
    let (best_idx, best_score) = scores
        .iter()
        .enumerate()
        .map(|(i, &s)| (i, if needs_sigmoid { sigmoid(s) } else { s }))
        .fold((0usize, f32::MIN), |acc, cur| if cur.1 > acc.1 { cur } else { acc });

    Some(RawDetection {
        x1: cx - w / 2.0,
        y1: cy - h / 2.0,
        x2: cx + w / 2.0,
        y2: cy + h / 2.0,
        conf: best_score,
        class_id: best_idx,
    })
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[allow(clippy::too_many_arguments)]
fn postprocess(
    dets: Vec<RawDetection>,
    letterbox: LetterboxInfo,
    orig_w: u32,
    orig_h: u32,
    conf_threshold: f32,
    classes_filter: Option<&[usize]>,
    num_classes: usize,
) -> Vec<RawDetection> {
    dets.into_iter()
        .filter(|d| d.conf >= conf_threshold)
        .filter(|d| {
            if d.class_id >= num_classes {
                warn!(class_id = d.class_id, "detection class id out of range, dropping");
                return false;
            }
            true
        })
        .filter(|d| classes_filter.map(|f| f.contains(&d.class_id)).unwrap_or(true))
        .filter_map(|d| {
            let x1 = (d.x1 - letterbox.pad_w) / letterbox.scale;
            let y1 = (d.y1 - letterbox.pad_h) / letterbox.scale;
            let x2 = (d.x2 - letterbox.pad_w) / letterbox.scale;
            let y2 = (d.y2 - letterbox.pad_h) / letterbox.scale;

            let x1 = x1.clamp(0.0, orig_w as f32);
            let y1 = y1.clamp(0.0, orig_h as f32);
            let x2 = x2.clamp(0.0, orig_w as f32);
            let y2 = y2.clamp(0.0, orig_h as f32);

            if x2 <= x1 || y2 <= y1 {
                return None;
            }

            Some(RawDetection {
                x1,
                y1,
                x2,
                y2,
                conf: d.conf,
                class_id: d.class_id,
            })
        })
        .collect()
}

fn normalize_boxes(dets: Vec<RawDetection>, width: u32, height: u32) -> Vec<RawDetection> {
    let (w, h) = (width as f32, height as f32);
    dets.into_iter()
        .map(|d| RawDetection {
            x1: d.x1 / w,
            y1: d.y1 / h,
            x2: d.x2 / w,
            y2: d.y2 / h,
            conf: d.conf,
            class_id: d.class_id,
        })
        .collect()
}

/// Greedy per-class NMS: sort by confidence descending, keep the top
/// box, suppress the rest with IoU above `iou_threshold`, repeat.
pub fn nms(mut dets: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    dets.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<RawDetection> = Vec::new();
    'outer: for d in dets {
        for k in &kept {
            if k.class_id == d.class_id && iou(k, &d) > iou_threshold {
                continue 'outer;
            }
        }
        kept.push(d);
    }
    kept
}

fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);

    let iw = (ix2 - ix1).max(0.0);
    let ih = (iy2 - iy1).max(0.0);
    let inter = iw * ih;

    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - inter;

    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, conf: f32, class_id: usize) -> RawDetection {
        RawDetection {
            x1,
            y1,
            x2,
            y2,
            conf,
            class_id,
        }
    }

    #[test]
    fn nms_suppresses_overlapping_same_class_boxes() {
        let dets = vec![
            det(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            det(1.0, 1.0, 11.0, 11.0, 0.8, 0),
            det(50.0, 50.0, 60.0, 60.0, 0.7, 0),
        ];
        let kept = nms(dets, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].conf, 0.9);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let dets = vec![
            det(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            det(0.0, 0.0, 10.0, 10.0, 0.8, 1),
        ];
        let kept = nms(dets, 0.5);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn nms_is_idempotent() {
        let dets = vec![
            det(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            det(1.0, 1.0, 11.0, 11.0, 0.8, 0),
            det(50.0, 50.0, 60.0, 60.0, 0.7, 0),
        ];
        let once = nms(dets.clone(), 0.5);
        let twice = nms(once.clone(), 0.5);
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn postprocess_drops_degenerate_boxes() {
        let dets = vec![det(5.0, 5.0, 5.0, 5.0, 0.9, 0)];
        let letterbox = LetterboxInfo {
            scale: 1.0,
            pad_w: 0.0,
            pad_h: 0.0,
        };
        let out = postprocess(dets, letterbox, 100, 100, 0.1, None, 80);
        assert!(out.is_empty());
    }

    #[test]
    fn postprocess_respects_classes_filter() {
        let dets = vec![det(0.0, 0.0, 10.0, 10.0, 0.9, 2)];
        let letterbox = LetterboxInfo {
            scale: 1.0,
            pad_w: 0.0,
            pad_h: 0.0,
        };
        let out = postprocess(dets, letterbox, 100, 100, 0.1, Some(&[0, 1]), 80);
        assert!(out.is_empty());
    }

    #[test]
    fn normalized_boxes_are_within_unit_square() {
        let dets = vec![det(0.0, 0.0, 50.0, 50.0, 0.9, 0)];
        let out = normalize_boxes(dets, 100, 100);
        assert!(out[0].x2 <= 1.0 && out[0].y2 <= 1.0);
    }
}
