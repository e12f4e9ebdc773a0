//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. The frame is
//! resized to fit the 640×640 input, anchored at the top-left corner; the
//! padding normalizes to zero.

use crate::embedder::DetectionError;
use crate::onnx::{inference_failed, ModelError};
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    scores: usize,
    boxes: usize,
    keypoints: usize,
}

/// Raw head outputs for one stride.
struct StrideTensors<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    keypoints: &'a [f32],
}

pub struct ScrfdDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(ModelError::Incompatible(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), got {}",
                names.len()
            )));
        }
        let outputs = map_outputs(&names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            mapping = ?outputs,
            "loaded SCRFD model"
        );

        Ok(Self { session, outputs })
    }

    /// Detect faces, returning boxes in frame coordinates sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectionError> {
        let (input, scale) = preprocess(image);
        let tensor = TensorRef::from_array_view(input.view()).map_err(inference_failed("SCRFD input"))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(inference_failed("SCRFD run"))?;

        let mut candidates = Vec::new();
        for (slot, &stride) in self.outputs.iter().zip(SCRFD_STRIDES.iter()) {
            let (_, scores) = outputs[slot.scores]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[slot.boxes]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;
            let (_, keypoints) = outputs[slot.keypoints]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::InferenceFailed(format!("keypoints stride {stride}: {e}")))?;
            let tensors = StrideTensors { scores, boxes, keypoints };
            candidates.extend(decode_stride(&tensors, stride, scale, SCRFD_SCORE_THRESHOLD));
        }

        Ok(suppress_overlaps(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Locate each stride's tensors by name ("score_8", "bbox_16", "kps_32", ...),
/// falling back to the standard export order: scores, boxes, keypoints.
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                scores: position("score", stride)?,
                boxes: position("bbox", stride)?,
                keypoints: position("kps", stride)?,
            })
        })
        .collect();

    match named.and_then(|v| <[StrideOutputs; 3]>::try_from(v).ok()) {
        Some(mapping) => mapping,
        None => {
            tracing::debug!(?names, "SCRFD output names not recognized; using positional mapping");
            std::array::from_fn(|i| StrideOutputs {
                scores: i,
                boxes: i + 3,
                keypoints: i + 6,
            })
        }
    }
}

/// Resize into the top-left of the NCHW input tensor. Returns the tensor and
/// the input/frame scale factor.
fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
    let size = SCRFD_INPUT_SIZE as f32;
    let scale = (size / image.width() as f32).min(size / image.height() as f32);
    let new_w = ((image.width() as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((image.height() as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (x, y, px) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    (tensor, scale)
}

fn decode_stride(t: &StrideTensors<'_>, stride: usize, scale: f32, threshold: f32) -> Vec<BoundingBox> {
    let cols = SCRFD_INPUT_SIZE / stride;
    let rows = SCRFD_INPUT_SIZE / stride;
    let step = stride as f32;

    (0..rows * cols * SCRFD_ANCHORS_PER_CELL)
        .filter_map(|idx| {
            let score = *t.scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % cols) as f32 * step;
            let cy = (cell / cols) as f32 * step;

            let d = t.boxes.get(idx * 4..idx * 4 + 4)?;
            let x1 = (cx - d[0] * step) / scale;
            let y1 = (cy - d[1] * step) / scale;
            let x2 = (cx + d[2] * step) / scale;
            let y2 = (cy + d[3] * step) / scale;

            let landmarks = t.keypoints.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    ((cx + k[i * 2] * step) / scale, (cy + k[i * 2 + 1] * step) / scale)
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy NMS: keep the most confident box of every overlapping cluster.
fn suppress_overlaps(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
