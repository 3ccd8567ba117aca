//! Head-pose matching by angular difference.
//!
//! Poses are compared as directions: both the query and every candidate
//! are scaled to unit length, and the angle between them is
//! `acos(clip(dot, -1, 1))` in radians.

use crate::nearest::MatchError;
use crate::types::{CandidateFrame, Pose};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Minimum-angle candidate together with every candidate's angle.
#[derive(Debug, Clone)]
pub struct AngleMatch {
    pub best: usize,
    /// Angular difference per candidate row, in [0, π].
    pub angles: Array1<f32>,
}

/// Stack candidate poses into a K×3 matrix.
pub fn pose_matrix(frames: &[CandidateFrame]) -> Array2<f32> {
    let mut m = Array2::<f32>::zeros((frames.len(), 3));
    for (mut row, frame) in m.rows_mut().into_iter().zip(frames) {
        row.assign(&ArrayView1::from(frame.pose.as_slice()));
    }
    m
}

fn is_usable_norm(n: f32) -> bool {
    n > 0.0 && n.is_finite()
}

/// Find the candidate pose with the smallest angle to `query`.
///
/// Ties go to the lowest row index.
pub fn smallest_angle(
    query: &Pose,
    candidates: ArrayView2<'_, f32>,
) -> Result<AngleMatch, MatchError> {
    if candidates.ncols() != 3 {
        return Err(MatchError::DimensionMismatch {
            expected: 3,
            actual: candidates.ncols(),
        });
    }
    if candidates.nrows() == 0 {
        return Err(MatchError::EmptyCandidates);
    }

    let angles = unit_cosines(query, candidates)?.mapv(angle_from_cosine);

    let mut best = 0;
    for (i, &a) in angles.iter().enumerate() {
        if a < angles[best] {
            best = i;
        }
    }

    Ok(AngleMatch { best, angles })
}

/// Cosine between `query` and each candidate row, both unit-normalised.
/// Rounding can push a value slightly outside [-1, 1].
fn unit_cosines(query: &Pose, candidates: ArrayView2<'_, f32>) -> Result<Array1<f32>, MatchError> {
    let query_norm = query.norm();
    if !is_usable_norm(query_norm) {
        return Err(MatchError::DegenerateVector { row: None });
    }
    let target = ArrayView1::from(query.as_slice()).mapv(|v| v / query_norm);

    let lengths = candidates.map_axis(Axis(1), |row| row.dot(&row).sqrt());
    if let Some(row) = lengths.iter().position(|&l| !is_usable_norm(l)) {
        return Err(MatchError::DegenerateVector { row: Some(row) });
    }
    let unit = &candidates / &lengths.insert_axis(Axis(1));
    Ok(unit.dot(&target))
}

fn angle_from_cosine(c: f32) -> f32 {
    c.clamp(-1.0, 1.0).acos()
}
