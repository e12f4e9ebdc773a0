use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Map the box (and its landmarks) into a frame scaled by `sx` horizontally
    /// and `sy` vertically.
    pub fn scaled(&self, sx: f32, sy: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * sx, ly * sy))),
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face embedding vector as produced by the embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// False if any component is NaN or infinite. Such values cannot be
    /// persisted as JSON and never compare meaningfully.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance to another embedding.
    ///
    /// Returns `None` when the dimensions differ; such vectors come from
    /// different models and are not comparable.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }
}

/// A reference encoding for a known person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingVector {
    pub label: String,
    pub embedding: Embedding,
    /// Reference image the encoding was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

/// Outcome of matching one probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Matched identity; `None` means unknown.
    pub label: Option<String>,
    /// Distance to the nearest gallery encoding (`+inf` for an empty gallery).
    pub distance: f32,
    /// `1 - distance` clamped to [0, 1] on a match, 0 otherwise.
    pub confidence: f32,
    pub is_match: bool,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self {
            label: None,
            distance,
            confidence: 0.0,
            is_match: false,
        }
    }

    /// Similarity derived from the distance regardless of the match decision.
    pub fn raw_similarity(&self) -> f32 {
        if self.distance.is_finite() {
            (1.0 - self.distance).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// One detected face within a frame or image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceObservation {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    pub result: MatchResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: 1.0, landmarks: None,
        }
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert_eq!(a.euclidean_distance(&b), Some(5.0));
    }

    #[test]
    fn test_is_finite() {
        assert!(Embedding::new(vec![0.0, -1.5]).is_finite());
        assert!(!Embedding::new(vec![f32::NAN, 0.5]).is_finite());
        assert!(!Embedding::new(vec![0.5, f32::INFINITY]).is_finite());
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), None);
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_scaled_maps_landmarks() {
        let mut b = make_bbox(10.0, 20.0, 30.0, 40.0);
        b.landmarks = Some([(1.0, 2.0); 5]);
        let s = b.scaled(2.0, 4.0);
        assert_eq!((s.x, s.y, s.width, s.height), (20.0, 80.0, 60.0, 160.0));
        assert_eq!(s.landmarks, Some([(2.0, 8.0); 5]));
    }

    #[test]
    fn test_raw_similarity_for_unknown() {
        let r = MatchResult::unknown(0.75);
        assert_eq!(r.confidence, 0.0);
        assert!((r.raw_similarity() - 0.25).abs() < 1e-6);
        assert_eq!(MatchResult::unknown(f32::INFINITY).raw_similarity(), 0.0);
    }
}
