//! FaceNet-style identity embedder via ONNX Runtime.
//!
//! Face crops are resized to 160x160 and standardised per image before
//! inference. The output vector is L2-normalised so Euclidean distances
//! between embeddings are comparable across faces.

use crate::tensor::resized_tensor;
use image::RgbImage;
use lookalike_core::inference::{Embedder, InferenceError};
use lookalike_core::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FACENET_INPUT_SIZE: usize = 160;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<EmbedderError> for InferenceError {
    fn from(e: EmbedderError) -> Self {
        InferenceError::Model {
            model: "facenet",
            message: e.to_string(),
        }
    }
}

pub struct FacenetEmbedder {
    session: Session,
}

impl FacenetEmbedder {
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session })
    }

    pub fn extract(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        let input = Self::preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;
        if raw.is_empty() {
            return Err(EmbedderError::InferenceFailed("empty embedding".into()));
        }

        Ok(Embedding::new(l2_normalize(raw.to_vec())))
    }

    /// Resize to the model input and standardise to zero mean, unit
    /// variance over all pixels of the image.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let mut tensor = resized_tensor(face, FACENET_INPUT_SIZE, |_, v| v);
        let n = tensor.len() as f32;
        let mean = tensor.sum() / n;
        let variance = tensor.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        let std = variance.sqrt().max(1.0 / n.sqrt());
        tensor.mapv_inplace(|v| (v - mean) / std);
        tensor
    }
}

impl Embedder for FacenetEmbedder {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, InferenceError> {
        Ok(self.extract(face)?)
    }
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.into_iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
