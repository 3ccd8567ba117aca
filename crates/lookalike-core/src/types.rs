use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog identity key. Assigned by build order and used as the
/// foreign key of every frame belonging to the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
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
    /// Integer pixel rectangle `(x, y, width, height)` clamped to an image of
    /// the given size. Returns `None` when nothing of the box is inside.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = (self.x + self.width).ceil().min(image_width as f32);
        let y1 = (self.y + self.height).ceil().min(image_height as f32);

        if !(x1 > x0 && y1 > y0) {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Face embedding vector (dimensionality fixed by the embedding model, e.g. 128).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Head orientation as three angles (yaw, pitch, roll).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose(pub [f32; 3]);

impl Pose {
    pub fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self([yaw, pitch, roll])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

/// Normalized facial landmark coordinates, flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks(pub Vec<f32>);

/// One catalog subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub embedding: Embedding,
}

/// One stored observation of an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub identity_id: IdentityId,
    pub image_path: String,
    pub pose: Pose,
    pub landmarks: Landmarks,
}

/// The part of a [`Frame`] the matching pipeline reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFrame {
    pub identity_id: IdentityId,
    pub image_path: String,
    pub pose: Pose,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0, 0.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_pose_norm() {
        let p = Pose::new(2.0, 3.0, 6.0);
        assert!((p.norm() - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_inside() {
        let b = bbox(10.2, 20.7, 30.0, 40.0);
        assert_eq!(b.clamp_to(100, 100), Some((10, 20, 31, 41)));
    }

    #[test]
    fn test_clamp_partially_outside() {
        let b = bbox(-5.0, 90.0, 20.0, 20.0);
        assert_eq!(b.clamp_to(100, 100), Some((0, 90, 15, 10)));
    }

    #[test]
    fn test_clamp_fully_outside() {
        let b = bbox(150.0, 150.0, 10.0, 10.0);
        assert_eq!(b.clamp_to(100, 100), None);
    }
}
