//! lookout-core: Face recognition core.
//!
//! Builds a gallery of labeled face encodings from a directory of reference
//! photos, persists it with a fingerprint of its sources, and recognizes
//! faces in still images or live frame streams against it. Detection and
//! encoding sit behind [`FaceEmbedder`]; the bundled implementation runs
//! SCRFD and ArcFace through ONNX Runtime. New people are added by copying
//! or capturing photos into the reference directory.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod enroll;
pub mod fingerprint;
pub mod gallery;
pub mod matcher;
pub mod onnx;
pub mod pipeline;
pub mod quality;
pub mod recognizer;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use embedder::{locate_and_encode, DetectionError, FaceEmbedder};
pub use enroll::{CaptureOptions, CaptureReport, EnrollError, Enrollment};
pub use gallery::{Gallery, GalleryHandle, LabelStats};
pub use matcher::{EuclideanMatcher, Matcher};
pub use onnx::{ModelError, OnnxFaceEmbedder};
pub use pipeline::{BatchReport, PipelineConfig, RecognitionPipeline};
pub use quality::{ImageQuality, QualityAdvice};
pub use session::{run_session, CaptureError, FrameSource, Presenter, SessionSummary, StopSignal};
pub use store::{BuildDiagnostic, EncodingStore, GalleryManifest, GalleryOrigin, OpenedGallery, StoreError};
pub use types::{BoundingBox, Embedding, EncodingVector, FaceObservation, MatchResult};
