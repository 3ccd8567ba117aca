//! lookalike-core: stimulus selection for face-matching user studies.
//!
//! Holds the identity/frame catalog, narrows identities by embedding
//! distance, picks the frame with the closest head pose, and samples
//! identity-distinct distractors around it.

pub mod builder;
pub mod catalog;
pub mod codec;
pub mod inference;
pub mod manifest;
pub mod nearest;
pub mod pose;
pub mod query;
pub mod sampler;
pub mod types;

pub use builder::{BuildConfig, BuildError, BuildProgress, BuildReport, CatalogBuilder, NoProgress};
pub use catalog::{CatalogError, CatalogStats, CatalogStore};
pub use codec::{ArrayCodec, DecodeError, EncodeError, NumericArray};
pub use inference::{
    Embedder, FaceAnalyzer, FaceLocator, FacePipeline, InferenceError, LandmarkExtractor,
    PoseEstimator,
};
pub use query::{prepare_query, QueryError, QueryFace};
pub use sampler::{DiverseSampler, SamplerConfig, SamplerError, StimulusSet};
pub use types::{
    BoundingBox, CandidateFrame, Embedding, Frame, Identity, IdentityId, Landmarks, Pose,
};
