//! The face detection + embedding capability the core consumes.

use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("malformed image: {0}")]
    MalformedImage(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("embedder returned {encodings} encodings for {faces} faces")]
    CountMismatch { faces: usize, encodings: usize },
}

/// Locates faces in an image and turns each one into an embedding.
pub trait FaceEmbedder {
    /// Detect faces, returning their bounding boxes.
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectionError>;

    /// Extract one embedding per box, in the same order as `faces`.
    fn encode_faces(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, DetectionError>;

    /// Identifier of the embedding model, recorded in the persisted gallery.
    fn model_version(&self) -> Option<&str> {
        None
    }
}

impl<E: FaceEmbedder + ?Sized> FaceEmbedder for &mut E {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectionError> {
        (**self).detect_faces(image)
    }

    fn encode_faces(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, DetectionError> {
        (**self).encode_faces(image, faces)
    }

    fn model_version(&self) -> Option<&str> {
        (**self).model_version()
    }
}

/// Detect then encode, pairing every box with its own embedding.
///
/// Fails if the embedder does not return exactly one embedding per box,
/// since the pairing would otherwise attribute a match to the wrong face.
pub fn locate_and_encode<E: FaceEmbedder + ?Sized>(
    embedder: &mut E,
    image: &RgbImage,
) -> Result<Vec<(BoundingBox, Embedding)>, DetectionError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(DetectionError::MalformedImage(format!(
            "{}x{} image",
            image.width(),
            image.height()
        )));
    }

    let faces = embedder.detect_faces(image)?;
    if faces.is_empty() {
        return Ok(Vec::new());
    }

    let embeddings = embedder.encode_faces(image, &faces)?;
    if embeddings.len() != faces.len() {
        return Err(DetectionError::CountMismatch {
            faces: faces.len(),
            encodings: embeddings.len(),
        });
    }

    Ok(faces.into_iter().zip(embeddings).collect())
}
