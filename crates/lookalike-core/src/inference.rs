//! Boundary to the face-analysis models.
//!
//! The catalog builder and the query path only see these traits; the ONNX
//! implementations live in `lookalike-models`. Every method takes
//! `&mut self` because inference sessions are run mutably.

use crate::types::{BoundingBox, Embedding, Landmarks, Pose};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("{model}: {message}")]
    Model { model: &'static str, message: String },
    #[error(transparent)]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Locates the most prominent face in an image.
pub trait FaceLocator {
    fn detect_face_bounds(
        &mut self,
        image: &RgbImage,
    ) -> Result<Option<BoundingBox>, InferenceError>;
}

/// Extracts normalized landmarks from a face crop. `None` means the
/// landmarks could not be found.
pub trait LandmarkExtractor {
    fn extract_landmarks(&mut self, face: &RgbImage) -> Result<Option<Landmarks>, InferenceError>;
}

/// A detector that also yields landmarks.
pub trait FaceAnalyzer: FaceLocator + LandmarkExtractor {}

impl<T: FaceLocator + LandmarkExtractor> FaceAnalyzer for T {}

/// Computes an identity embedding from a face crop.
pub trait Embedder {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, InferenceError>;
}

/// Estimates head orientation from a face crop.
pub trait PoseEstimator {
    fn estimate_pose(&mut self, face: &RgbImage) -> Result<Pose, InferenceError>;
}

/// The collaborators needed to turn an image into catalog data.
pub struct FacePipeline<'a> {
    pub faces: &'a mut dyn FaceAnalyzer,
    pub embedder: &'a mut dyn Embedder,
    pub pose: &'a mut dyn PoseEstimator,
}

impl<'a> FacePipeline<'a> {
    pub fn new(
        faces: &'a mut dyn FaceAnalyzer,
        embedder: &'a mut dyn Embedder,
        pose: &'a mut dyn PoseEstimator,
    ) -> Self {
        Self { faces, embedder, pose }
    }

    /// Crop `image` to its detected face. `Ok(None)` if there is no face
    /// or the face box lies outside the image.
    pub fn crop_to_face(&mut self, image: &RgbImage) -> Result<Option<RgbImage>, InferenceError> {
        let Some(bounds) = self.faces.detect_face_bounds(image)? else {
            return Ok(None);
        };
        let Some((x, y, w, h)) = bounds.clamp_to(image.width(), image.height()) else {
            tracing::debug!(?bounds, "face box outside image");
            return Ok(None);
        };
        Ok(Some(image::imageops::crop_imm(image, x, y, w, h).to_image()))
    }
}
