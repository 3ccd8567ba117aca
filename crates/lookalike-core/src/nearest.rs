//! Embedding-distance narrowing.
//!
//! Picks the `n` catalog identities whose embeddings are closest (L2) to a
//! query embedding. Uses partial selection, so the returned indices are
//! NOT ordered by distance.

use crate::types::Embedding;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("no candidates to compare against")]
    EmptyCandidates,
    #[error("requested count must be at least 1")]
    InvalidCount,
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("zero-length vector cannot be normalized ({})", describe_row(.row))]
    DegenerateVector { row: Option<usize> },
}

fn describe_row(row: &Option<usize>) -> String {
    match row {
        Some(i) => format!("candidate row {i}"),
        None => "query".to_string(),
    }
}

/// Stack embeddings into an M×D matrix.
pub fn embedding_matrix(embeddings: &[&Embedding]) -> Result<Array2<f32>, MatchError> {
    let dim = embeddings.first().map(|e| e.dim()).unwrap_or(0);
    let mut flat = Vec::with_capacity(embeddings.len() * dim);
    for e in embeddings {
        if e.dim() != dim {
            return Err(MatchError::DimensionMismatch {
                expected: dim,
                actual: e.dim(),
            });
        }
        flat.extend_from_slice(&e.values);
    }
    Array2::from_shape_vec((embeddings.len(), dim), flat).map_err(|_| {
        MatchError::DimensionMismatch {
            expected: dim,
            actual: 0,
        }
    })
}

/// L2 distance from `query` to every row of `candidates`.
pub fn l2_distances(
    query: &[f32],
    candidates: ArrayView2<'_, f32>,
) -> Result<Array1<f32>, MatchError> {
    let cols = candidates.ncols();
    if cols != query.len() {
        return Err(MatchError::DimensionMismatch {
            expected: query.len(),
            actual: cols,
        });
    }
    let q = ArrayView1::from(query);
    let diff = &candidates - &q;
    Ok(diff.map_axis(Axis(1), |row| row.dot(&row).sqrt()))
}

/// Row indices of the `n` candidates closest to `query`.
///
/// `n` larger than the candidate count is clamped to it.
pub fn nearest_identities(
    query: &[f32],
    candidates: ArrayView2<'_, f32>,
    n: usize,
) -> Result<Vec<usize>, MatchError> {
    if n == 0 {
        return Err(MatchError::InvalidCount);
    }
    let m = candidates.nrows();
    if m == 0 {
        return Err(MatchError::EmptyCandidates);
    }

    let distances = l2_distances(query, candidates)?;
    let n = if n > m {
        tracing::debug!(requested = n, available = m, "narrowing count clamped");
        m
    } else {
        n
    };

    let mut order: Vec<usize> = (0..m).collect();
    if n < m {
        // NaN distances sort after everything else.
        let key = |i: usize| {
            let d = distances[i];
            if d.is_nan() { f32::INFINITY } else { d }
        };
        order.select_nth_unstable_by(n - 1, |&a, &b| key(a).total_cmp(&key(b)));
        order.truncate(n);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_picks_closest_rows() {
        let candidates = arr2(&[
            [10.0, 10.0],
            [0.1, 0.0],
            [5.0, 5.0],
            [0.0, 0.2],
            [-9.0, 3.0],
        ]);
        let mut picked = nearest_identities(&[0.0, 0.0], candidates.view(), 2).unwrap();
        picked.sort_unstable();
        assert_eq!(picked, vec![1, 3]);
    }

    #[test]
    fn test_n_equal_to_m_returns_all() {
        let candidates = arr2(&[[1.0], [2.0], [3.0]]);
        let mut picked = nearest_identities(&[0.0], candidates.view(), 3).unwrap();
        picked.sort_unstable();
        assert_eq!(picked, vec![0, 1, 2]);
    }

    #[test]
    fn test_n_larger_than_m_clamps() {
        let candidates = arr2(&[[1.0], [2.0]]);
        let picked = nearest_identities(&[0.0], candidates.view(), 5).unwrap();
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn test_zero_count_rejected() {
        let candidates = arr2(&[[1.0]]);
        assert_eq!(
            nearest_identities(&[0.0], candidates.view(), 0),
            Err(MatchError::InvalidCount)
        );
    }

    #[test]
    fn test_empty_candidates() {
        let candidates = Array2::<f32>::zeros((0, 4));
        assert_eq!(
            nearest_identities(&[0.0; 4], candidates.view(), 1),
            Err(MatchError::EmptyCandidates)
        );
    }

    #[test]
    fn test_dimension_mismatch() {
        let candidates = arr2(&[[1.0, 2.0]]);
        assert_eq!(
            nearest_identities(&[0.0, 0.0, 0.0], candidates.view(), 1),
            Err(MatchError::DimensionMismatch { expected: 3, actual: 2 })
        );
    }

    #[test]
    fn test_nan_row_loses() {
        let candidates = arr2(&[[f32::NAN], [100.0], [1.0]]);
        let mut picked = nearest_identities(&[0.0], candidates.view(), 2).unwrap();
        picked.sort_unstable();
        assert_eq!(picked, vec![1, 2]);
    }

    #[test]
    fn test_embedding_matrix_rejects_ragged() {
        let a = Embedding::new(vec![1.0, 2.0]);
        let b = Embedding::new(vec![1.0]);
        assert!(matches!(
            embedding_matrix(&[&a, &b]),
            Err(MatchError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_distances_match_embedding_helper() {
        let a = Embedding::new(vec![3.0, 4.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        let m = embedding_matrix(&[&a, &b]).unwrap();
        let d = l2_distances(&[0.0, 0.0], m.view()).unwrap();
        let origin = Embedding::new(vec![0.0, 0.0]);
        assert!((d[0] - origin.euclidean_distance(&a)).abs() < 1e-6);
        assert!((d[1] - origin.euclidean_distance(&b)).abs() < 1e-6);
    }

    fn arb_case() -> impl Strategy<Value = (Vec<Vec<f32>>, Vec<f32>, usize)> {
        (1usize..30, 1usize..8).prop_flat_map(|(m, d)| {
            (
                prop::collection::vec(prop::collection::vec(-100.0f32..100.0, d), m),
                prop::collection::vec(-100.0f32..100.0, d),
                1..=m,
            )
        })
    }

    proptest! {
        #[test]
        fn prop_returns_n_distinct_nearest((rows, query, n) in arb_case()) {
            let m = rows.len();
            let d = query.len();
            let flat: Vec<f32> = rows.into_iter().flatten().collect();
            let candidates = Array2::from_shape_vec((m, d), flat).unwrap();

            let picked = nearest_identities(&query, candidates.view(), n).unwrap();
            prop_assert_eq!(picked.len(), n);
            let set: HashSet<usize> = picked.iter().copied().collect();
            prop_assert_eq!(set.len(), n);
            prop_assert!(picked.iter().all(|&i| i < m));

            let dist = l2_distances(&query, candidates.view()).unwrap();
            let worst_picked = picked.iter().map(|&i| dist[i]).fold(f32::MIN, f32::max);
            let best_rest = (0..m)
                .filter(|i| !set.contains(i))
                .map(|i| dist[i])
                .fold(f32::MAX, f32::min);
            prop_assert!(worst_picked <= best_rest);
        }
    }
}
