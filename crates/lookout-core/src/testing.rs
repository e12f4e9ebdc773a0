//! Deterministic embedder for unit tests.
//!
//! Images encode their own faces: pixel (0, 0) holds the face count in the red
//! channel (green = 255 marks the image as malformed) and pixel (i + 1, 0)
//! holds the RGB triple that becomes face `i`'s embedding, scaled by 1/100.
//! Face `i` is reported at x = 10 * i. A face whose red channel equals
//! [`NAN_MARKER`] encodes to NaN.

use crate::embedder::{DetectionError, FaceEmbedder};
use crate::types::{BoundingBox, Embedding};
use image::{Rgb, RgbImage};
use std::path::Path;

pub const NAN_MARKER: u8 = 254;

pub struct FakeEmbedder {
    pub detect_calls: usize,
    pub encode_calls: usize,
    pub drop_last_encoding: bool,
    pub model: &'static str,
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self {
            detect_calls: 0,
            encode_calls: 0,
            drop_last_encoding: false,
            model: "fake-v1",
        }
    }
}

impl FaceEmbedder for FakeEmbedder {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectionError> {
        self.detect_calls += 1;
        let header = image.get_pixel(0, 0);
        if header[1] == 255 {
            return Err(DetectionError::MalformedImage("fake corrupt frame".into()));
        }
        Ok((0..header[0] as usize)
            .map(|i| BoundingBox {
                x: (i * 10) as f32,
                y: 0.0,
                width: 10.0,
                height: 10.0,
                confidence: 0.99,
                landmarks: None,
            })
            .collect())
    }

    fn encode_faces(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, DetectionError> {
        self.encode_calls += 1;
        let mut out: Vec<Embedding> = faces
            .iter()
            .map(|face| {
                let idx = (face.x / 10.0).round() as u32 + 1;
                let px = image.get_pixel(idx, 0);
                if px[0] == NAN_MARKER {
                    return Embedding::new(vec![f32::NAN, 0.0, 0.0]);
                }
                Embedding {
                    values: px.0.iter().map(|&v| v as f32 / 100.0).collect(),
                    model_version: Some(self.model.to_string()),
                }
            })
            .collect();
        if self.drop_last_encoding {
            out.pop();
        }
        Ok(out)
    }

    fn model_version(&self) -> Option<&str> {
        Some(self.model)
    }
}

pub fn face_image(faces: &[[u8; 3]]) -> RgbImage {
    face_image_sized(faces, (faces.len() as u32 + 1).max(4), 4)
}

pub fn face_image_sized(faces: &[[u8; 3]], width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::new(width, height);
    img.put_pixel(0, 0, Rgb([faces.len() as u8, 0, 0]));
    for (i, face) in faces.iter().enumerate() {
        img.put_pixel(i as u32 + 1, 0, Rgb(*face));
    }
    img
}

pub fn malformed_image() -> RgbImage {
    let mut img = RgbImage::new(4, 4);
    img.put_pixel(0, 0, Rgb([1, 255, 0]));
    img
}

pub fn write_face_png(path: &Path, faces: &[[u8; 3]]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    face_image(faces).save(path).unwrap();
}
