//! Per-frame and per-image recognition: detect, encode, match every face.

use crate::embedder::{locate_and_encode, DetectionError, FaceEmbedder};
use crate::gallery::Gallery;
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::types::FaceObservation;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PipelineConfigError {
    #[error("frame_skip_interval must be at least 1")]
    ZeroSkipInterval,
    #[error("detection_scale must be in (0, 1], got {0}")]
    InvalidScale(f32),
}

/// Throughput settings for a pipeline instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Fully process one frame in every `frame_skip_interval`; 1 = every frame.
    pub frame_skip_interval: u32,
    /// Frames are shrunk by this factor before detection; boxes are mapped back.
    pub detection_scale: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_skip_interval: 1,
            detection_scale: 1.0,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineConfigError> {
        if self.frame_skip_interval == 0 {
            return Err(PipelineConfigError::ZeroSkipInterval);
        }
        if !(self.detection_scale > 0.0 && self.detection_scale <= 1.0) {
            return Err(PipelineConfigError::InvalidScale(self.detection_scale));
        }
        Ok(())
    }
}

/// Running counters for a pipeline instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_seen: u64,
    pub frames_processed: u64,
    pub frames_failed: u64,
    pub faces_observed: u64,
}

/// Result of the last fully processed frame, reused for skipped frames.
struct CarriedFrame {
    index: u64,
    width: u32,
    height: u32,
    observations: Vec<FaceObservation>,
}

/// Drives detect → encode → match for one session.
pub struct RecognitionPipeline<E> {
    embedder: E,
    matcher: EuclideanMatcher,
    config: PipelineConfig,
    carried: Option<CarriedFrame>,
    stats: PipelineStats,
}

impl<E: FaceEmbedder> RecognitionPipeline<E> {
    pub fn new(embedder: E, config: PipelineConfig) -> Result<Self, PipelineConfigError> {
        config.validate()?;
        Ok(Self {
            embedder,
            matcher: EuclideanMatcher,
            config,
            carried: None,
            stats: PipelineStats::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn embedder_mut(&mut self) -> &mut E {
        &mut self.embedder
    }

    /// Forget the carried frame; the next frame is fully processed.
    pub fn reset(&mut self) {
        self.carried = None;
    }

    /// Recognize faces in one frame of a live stream.
    ///
    /// Only frames at least `frame_skip_interval` after the last processed one
    /// are analyzed; the others reuse its observations, rescaled if the frame
    /// size changed. A failed frame yields an empty result and is carried as such.
    pub fn process_frame(
        &mut self,
        frame: &RgbImage,
        gallery: &Gallery,
        tolerance: f32,
        frame_index: u64,
    ) -> Vec<FaceObservation> {
        self.stats.frames_seen += 1;

        if !self.is_due(frame_index) {
            if let Some(carried) = &self.carried {
                return reuse(carried, frame.width(), frame.height());
            }
        }

        let observations = self.analyze_or_log(frame, gallery, tolerance, frame_index);
        self.carried = Some(CarriedFrame {
            index: frame_index,
            width: frame.width(),
            height: frame.height(),
            observations: observations.clone(),
        });
        observations
    }

    /// Recognize faces in a standalone image. Reads and writes no frame state.
    pub fn process_image(
        &mut self,
        image: &RgbImage,
        gallery: &Gallery,
        tolerance: f32,
    ) -> Vec<FaceObservation> {
        self.stats.frames_seen += 1;
        self.analyze_or_log(image, gallery, tolerance, 0)
    }

    fn is_due(&self, frame_index: u64) -> bool {
        match &self.carried {
            None => true,
            Some(c) if frame_index < c.index => true,
            Some(c) => frame_index - c.index >= u64::from(self.config.frame_skip_interval),
        }
    }

    fn analyze_or_log(
        &mut self,
        frame: &RgbImage,
        gallery: &Gallery,
        tolerance: f32,
        frame_index: u64,
    ) -> Vec<FaceObservation> {
        self.stats.frames_processed += 1;
        match self.analyze(frame, gallery, tolerance) {
            Ok(observations) => {
                self.stats.faces_observed += observations.len() as u64;
                tracing::debug!(frame = frame_index, faces = observations.len(), "frame analyzed");
                observations
            }
            Err(e) => {
                self.stats.frames_failed += 1;
                tracing::warn!(frame = frame_index, error = %e, "face extraction failed; frame skipped");
                Vec::new()
            }
        }
    }

    fn analyze(
        &mut self,
        frame: &RgbImage,
        gallery: &Gallery,
        tolerance: f32,
    ) -> Result<Vec<FaceObservation>, DetectionError> {
        let work = downscale(frame, self.config.detection_scale);
        let faces = locate_and_encode(&mut self.embedder, &work)?;

        let sx = frame.width() as f32 / work.width().max(1) as f32;
        let sy = frame.height() as f32 / work.height().max(1) as f32;

        Ok(faces
            .into_iter()
            .map(|(bbox, embedding)| {
                let result = self.matcher.compare(&embedding, gallery, tolerance);
                FaceObservation {
                    bbox: bbox.scaled(sx, sy),
                    embedding,
                    result,
                }
            })
            .collect())
    }
}

fn downscale(frame: &RgbImage, scale: f32) -> Cow<'_, RgbImage> {
    if scale >= 1.0 || frame.width() == 0 || frame.height() == 0 {
        return Cow::Borrowed(frame);
    }
    let w = ((frame.width() as f32 * scale).round() as u32).max(1);
    let h = ((frame.height() as f32 * scale).round() as u32).max(1);
    Cow::Owned(imageops::resize(frame, w, h, FilterType::Triangle))
}

fn reuse(carried: &CarriedFrame, width: u32, height: u32) -> Vec<FaceObservation> {
    if carried.width == width && carried.height == height {
        return carried.observations.clone();
    }
    let sx = width as f32 / carried.width.max(1) as f32;
    let sy = height as f32 / carried.height.max(1) as f32;
    carried
        .observations
        .iter()
        .map(|obs| FaceObservation {
            bbox: obs.bbox.scaled(sx, sy),
            ..obs.clone()
        })
        .collect()
}

/// Observations for one image of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub source: PathBuf,
    pub observations: Vec<FaceObservation>,
}

/// Accumulated results of a batch-image run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn push(&mut self, source: impl Into<PathBuf>, observations: Vec<FaceObservation>) {
        self.entries.push(BatchEntry {
            source: source.into(),
            observations,
        });
    }

    /// Number of images each known label was recognized in.
    pub fn label_tally(&self) -> BTreeMap<String, usize> {
        let mut tally = BTreeMap::new();
        for entry in &self.entries {
            let mut seen: Vec<&str> = entry
                .observations
                .iter()
                .filter_map(|o| o.result.label.as_deref())
                .collect();
            seen.sort_unstable();
            seen.dedup();
            for label in seen {
                *tally.entry(label.to_string()).or_insert(0) += 1;
            }
        }
        tally
    }

    pub fn unknown_faces(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|e| &e.observations)
            .filter(|o| !o.result.is_match)
            .count()
    }

    pub fn total_faces(&self) -> usize {
        self.entries.iter().map(|e| e.observations.len()).sum()
    }
}
