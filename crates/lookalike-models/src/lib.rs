//! lookalike-models: ONNX Runtime implementations of the face-analysis
//! collaborators used by `lookalike-core`.
//!
//! SCRFD locates faces and their five keypoints, a FaceNet-style model
//! produces identity embeddings, and a regression model estimates head
//! pose. All run on CPU.

pub mod detector;
pub mod embedder;
pub mod pose;
mod tensor;

pub use detector::{DetectorError, ScrfdDetector};
pub use embedder::{EmbedderError, FacenetEmbedder};
pub use pose::{OnnxPoseEstimator, PoseError};
