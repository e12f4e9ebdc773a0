//! ONNX-backed [`FaceEmbedder`]: SCRFD detection plus ArcFace encoding.

use crate::detector::ScrfdDetector;
use crate::embedder::{DetectionError, FaceEmbedder};
use crate::recognizer::{ArcFaceEncoder, ARCFACE_MODEL_VERSION};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} (download the insightface buffalo_l pack into the model directory)")]
    ModelNotFound(String),
    #[error("incompatible model: {0}")]
    Incompatible(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct OnnxFaceEmbedder {
    detector: ScrfdDetector,
    encoder: ArcFaceEncoder,
}

impl OnnxFaceEmbedder {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ModelError> {
        let detector = ScrfdDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let encoder = ArcFaceEncoder::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, encoder })
    }
}

/// Wrap a runtime error from one inference stage as [`DetectionError::InferenceFailed`].
pub(crate) fn inference_failed<E: std::fmt::Display>(stage: &str) -> impl FnOnce(E) -> DetectionError + '_ {
    move |e| DetectionError::InferenceFailed(format!("{stage}: {e}"))
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectionError> {
        self.detector.detect(image)
    }

    fn encode_faces(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, DetectionError> {
        faces.iter().map(|face| self.encoder.encode(image, face)).collect()
    }

    fn model_version(&self) -> Option<&str> {
        Some(ARCFACE_MODEL_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reports_missing_detector() {
        let dir = tempfile::tempdir().unwrap();
        match OnnxFaceEmbedder::load(dir.path()) {
            Err(ModelError::ModelNotFound(path)) => assert!(path.ends_with(DETECTOR_MODEL_FILE)),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("load succeeded without models"),
        }
    }

    #[test]
    fn test_inference_failed_names_the_stage() {
        let err = inference_failed("SCRFD run")("session poisoned");
        assert!(matches!(&err, DetectionError::InferenceFailed(msg) if msg == "SCRFD run: session poisoned"));
        assert_eq!(err.to_string(), "inference failed: SCRFD run: session poisoned");
    }
}
