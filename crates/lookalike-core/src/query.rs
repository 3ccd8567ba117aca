//! Turn a query photo into the embedding and pose the sampler matches on.

use crate::inference::{FacePipeline, InferenceError};
use crate::types::{Embedding, Pose};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("no face detected in the query image")]
    NoFace,
    #[error("inference: {0}")]
    Inference(#[from] InferenceError),
}

/// Embedding and head pose of the query face.
#[derive(Debug, Clone, Serialize)]
pub struct QueryFace {
    pub embedding: Embedding,
    pub pose: Pose,
}

/// Crop the query image to its face, then embed it and estimate its pose.
pub fn prepare_query(
    image: &RgbImage,
    pipeline: &mut FacePipeline<'_>,
) -> Result<QueryFace, QueryError> {
    let face = pipeline.crop_to_face(image)?.ok_or(QueryError::NoFace)?;
    let embedding = pipeline.embedder.embed(&face)?;
    let pose = pipeline.pose.estimate_pose(&face)?;

    tracing::info!(
        width = face.width(),
        height = face.height(),
        dim = embedding.dim(),
        yaw = pose.0[0],
        pitch = pose.0[1],
        roll = pose.0[2],
        "query face prepared"
    );

    Ok(QueryFace { embedding, pose })
}
