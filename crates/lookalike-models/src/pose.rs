//! Head-pose regression via ONNX Runtime.
//!
//! Accepts models that emit a single `[1, 3]` tensor of yaw/pitch/roll as
//! well as models with three scalar heads in that order.

use crate::tensor::resized_tensor;
use image::RgbImage;
use lookalike_core::inference::{InferenceError, PoseEstimator};
use lookalike_core::types::Pose;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const POSE_INPUT_SIZE: usize = 224;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum PoseError {
    #[error("model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<PoseError> for InferenceError {
    fn from(e: PoseError) -> Self {
        InferenceError::Model {
            model: "pose",
            message: e.to_string(),
        }
    }
}

pub struct OnnxPoseEstimator {
    session: Session,
    num_outputs: usize,
}

impl OnnxPoseEstimator {
    pub fn load(model_path: &Path) -> Result<Self, PoseError> {
        if !model_path.exists() {
            return Err(PoseError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded pose model"
        );

        Ok(Self { session, num_outputs })
    }

    /// (yaw, pitch, roll) of the face in `face`.
    pub fn estimate(&mut self, face: &RgbImage) -> Result<Pose, PoseError> {
        let input = Self::preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let heads = if self.num_outputs >= 3 { 3 } else { 1 };
        let mut tensors = Vec::with_capacity(heads);
        for head in 0..heads {
            let (_, data) = outputs[head]
                .try_extract_tensor::<f32>()
                .map_err(|e| PoseError::InferenceFailed(format!("output {head}: {e}")))?;
            tensors.push(data);
        }
        pose_from_heads(&tensors)
    }

    /// Resize to 224x224 and apply ImageNet channel statistics.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        resized_tensor(face, POSE_INPUT_SIZE, |c, v| {
            (v / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
        })
    }
}

impl PoseEstimator for OnnxPoseEstimator {
    fn estimate_pose(&mut self, face: &RgbImage) -> Result<Pose, InferenceError> {
        Ok(self.estimate(face)?)
    }
}

/// Either one output holding exactly yaw, pitch, roll, or three outputs
/// holding one angle each. Anything else (binned heads, batches) is
/// rejected rather than truncated.
fn pose_from_heads(heads: &[&[f32]]) -> Result<Pose, PoseError> {
    match *heads {
        [[yaw, pitch, roll]] => Ok(Pose::new(*yaw, *pitch, *roll)),
        [[yaw], [pitch], [roll]] => Ok(Pose::new(*yaw, *pitch, *roll)),
        _ => Err(PoseError::InferenceFailed(format!(
            "expected one 3-value output or three scalar outputs, got sizes {:?}",
            heads.iter().map(|h| h.len()).collect::<Vec<_>>()
        ))),
    }
}
