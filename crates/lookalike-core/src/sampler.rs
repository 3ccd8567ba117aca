//! Forced-choice stimulus selection.
//!
//! One run narrows the catalog to the identities closest to the query
//! embedding, picks the frame among them whose head pose is closest to
//! the query pose, then draws distractor frames so that every result
//! belongs to a different identity. The results are shuffled before they
//! are returned so the slot of the best match carries no information.

use crate::catalog::{CatalogError, CatalogStore};
use crate::nearest::{embedding_matrix, nearest_identities, MatchError};
use crate::pose::{pose_matrix, smallest_angle};
use crate::query::QueryFace;
use crate::types::{CandidateFrame, Embedding, Identity, IdentityId};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

pub const DEFAULT_NARROW_COUNT: usize = 5;
pub const DEFAULT_DISTRACTOR_COUNT: usize = 3;
pub const DEFAULT_MAX_DRAWS: usize = 1000;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("matching: {0}")]
    Match(#[from] MatchError),
    #[error("catalog has no identities")]
    EmptyCatalog,
    #[error("catalog has {available} identities, narrowing needs {required}")]
    InsufficientIdentities { required: usize, available: usize },
    #[error("narrowed identities have no stored frames")]
    EmptyPool,
    #[error("best frame index {best} outside a pool of {len}")]
    BestOutOfRange { best: usize, len: usize },
    #[error("candidate pool cannot supply {required} distinct identities (found {found})")]
    InsufficientDistinctIdentities { required: usize, found: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Identities kept after embedding narrowing.
    pub narrow_count: usize,
    pub distractor_count: usize,
    /// Ceiling on random draws while picking distractors.
    pub max_draws: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            narrow_count: DEFAULT_NARROW_COUNT,
            distractor_count: DEFAULT_DISTRACTOR_COUNT,
            max_draws: DEFAULT_MAX_DRAWS,
        }
    }
}

/// The frames shown to a study participant.
#[derive(Debug, Clone, Serialize)]
pub struct StimulusSet {
    /// Image paths in presentation order.
    pub paths: Vec<String>,
    /// Path of the ground-truth best match (one of `paths`).
    pub best_match: String,
}

pub struct DiverseSampler<R> {
    config: SamplerConfig,
    rng: R,
}

impl<R: Rng> DiverseSampler<R> {
    pub fn new(config: SamplerConfig, rng: R) -> Self {
        Self { config, rng }
    }

    /// Run one selection against the catalog.
    pub fn select(
        &mut self,
        catalog: &CatalogStore,
        query: &QueryFace,
    ) -> Result<StimulusSet, SamplerError> {
        let identities = catalog.all_identity_embeddings()?;
        let narrowed = self.narrow(&identities, &query.embedding)?;
        tracing::debug!(identities = ?narrowed, "identities narrowed");

        let pool = catalog.frames_for_identities(&narrowed)?;
        if pool.is_empty() {
            return Err(SamplerError::EmptyPool);
        }
        tracing::debug!(frames = pool.len(), "frames collected");

        let matched = smallest_angle(&query.pose, pose_matrix(&pool).view())?;
        let best = matched.best;
        tracing::info!(
            identity = %pool[best].identity_id,
            path = %pool[best].image_path,
            angle = matched.angles[best],
            "best frame picked"
        );

        let distractors = self.pick_distractors(&pool, best)?;

        let mut paths: Vec<String> = std::iter::once(best)
            .chain(distractors)
            .map(|i| pool[i].image_path.clone())
            .collect();
        paths.shuffle(&mut self.rng);

        Ok(StimulusSet {
            paths,
            best_match: pool[best].image_path.clone(),
        })
    }

    fn narrow(
        &self,
        identities: &[Identity],
        query: &Embedding,
    ) -> Result<Vec<IdentityId>, SamplerError> {
        if identities.is_empty() {
            return Err(SamplerError::EmptyCatalog);
        }
        if identities.len() < self.config.narrow_count {
            return Err(SamplerError::InsufficientIdentities {
                required: self.config.narrow_count,
                available: identities.len(),
            });
        }

        let embeddings: Vec<&Embedding> = identities.iter().map(|i| &i.embedding).collect();
        let matrix = embedding_matrix(&embeddings)?;
        let rows = nearest_identities(&query.values, matrix.view(), self.config.narrow_count)?;
        Ok(rows.into_iter().map(|i| identities[i].id).collect())
    }

    /// Draw distractor indices into `pool`, each from an identity not yet
    /// represented by the best match or an earlier distractor.
    fn pick_distractors(
        &mut self,
        pool: &[CandidateFrame],
        best: usize,
    ) -> Result<Vec<usize>, SamplerError> {
        let best_identity = pool
            .get(best)
            .ok_or(SamplerError::BestOutOfRange { best, len: pool.len() })?
            .identity_id;
        let wanted = self.config.distractor_count;
        let required = wanted + 1;

        let distinct = pool.iter().map(|f| f.identity_id).collect::<HashSet<_>>().len();
        if distinct < required {
            return Err(SamplerError::InsufficientDistinctIdentities {
                required,
                found: distinct,
            });
        }

        let mut used_identities = vec![best_identity];
        let mut chosen: Vec<usize> = Vec::with_capacity(wanted);
        let mut draws = 0;

        while chosen.len() < wanted {
            if draws == self.config.max_draws {
                tracing::warn!(draws, chosen = chosen.len(), "distractor draws exhausted");
                return Err(SamplerError::InsufficientDistinctIdentities {
                    required,
                    found: used_identities.len(),
                });
            }
            draws += 1;

            let idx = self.rng.gen_range(0..pool.len());
            if idx == best
                || chosen.contains(&idx)
                || used_identities.contains(&pool[idx].identity_id)
            {
                continue;
            }
            chosen.push(idx);
            used_identities.push(pool[idx].identity_id);
        }

        tracing::debug!(draws, ?chosen, "distractors picked");
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ArrayCodec;
    use crate::types::{Landmarks, Pose};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn frame(id: i64, path: &str, pose: [f32; 3]) -> CandidateFrame {
        CandidateFrame { identity_id: IdentityId(id), image_path: path.into(), pose: Pose(pose) }
    }

    fn sampler(seed: u64) -> DiverseSampler<StdRng> {
        DiverseSampler::new(SamplerConfig::default(), StdRng::seed_from_u64(seed))
    }

    /// Identity `i` has embedding `[i, 0]` and one frame per pose given.
    fn catalog(people: &[(&str, &[[f32; 3]])]) -> (CatalogStore, HashMap<String, i64>) {
        let store = CatalogStore::open_in_memory(ArrayCodec::new()).unwrap();
        let mut owner = HashMap::new();
        for (i, (name, poses)) in people.iter().enumerate() {
            let id = IdentityId(i as i64);
            store.insert_identity(id, &Embedding::new(vec![i as f32, 0.0])).unwrap();
            for (j, pose) in poses.iter().enumerate() {
                let path = format!("data/{name}/{j}.jpg");
                store
                    .insert_frame(id, &path, &Pose(*pose), &Landmarks(vec![0.5; 4]))
                    .unwrap();
                owner.insert(path, i as i64);
            }
        }
        (store, owner)
    }

    fn query(embedding: [f32; 2], pose: [f32; 3]) -> QueryFace {
        QueryFace { embedding: Embedding::new(embedding.to_vec()), pose: Pose(pose) }
    }

    #[test]
    fn test_five_identities_end_to_end() {
        let (store, owner) = catalog(&[
            ("a", &[[1.0, 0.0, 0.0]]),
            ("b", &[[0.0, 1.0, 0.0]]),
            ("c", &[[0.0, 0.0, 1.0]]),
            ("d", &[[1.0, 1.0, 0.0]]),
            ("e", &[[0.0, 1.0, 1.0]]),
        ]);

        let set = sampler(7).select(&store, &query([0.0, 0.0], [1.0, 0.0, 0.0])).unwrap();
        assert_eq!(set.best_match, "data/a/0.jpg");
        assert_eq!(set.paths.len(), 4);
        assert!(set.paths.contains(&set.best_match));

        let ids: HashSet<i64> = set.paths.iter().map(|p| owner[p]).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_best_match_limited_to_narrowed_identities() {
        // Identity 6 holds the exact pose but sits far away in embedding space.
        let (store, owner) = catalog(&[
            ("p0", &[[1.0, 0.2, 0.0]]),
            ("p1", &[[0.0, 1.0, 0.0]]),
            ("p2", &[[0.0, 0.0, 1.0]]),
            ("p3", &[[0.3, 1.0, 0.0]]),
            ("p4", &[[0.0, 1.0, 1.0]]),
            ("p5", &[[1.0, 1.0, 1.0]]),
            ("p6", &[[1.0, 0.0, 0.0]]),
        ]);

        for seed in 0..20 {
            let set = sampler(seed).select(&store, &query([0.0, 0.0], [1.0, 0.0, 0.0])).unwrap();
            assert_eq!(set.best_match, "data/p0/0.jpg");
            assert!(set.paths.iter().all(|p| owner[p] <= 4), "{:?}", set.paths);
        }
    }

    #[test]
    fn test_every_result_is_a_distinct_identity() {
        let (store, owner) = catalog(&[
            ("a", &[[1.0, 0.0, 0.0], [0.9, 0.1, 0.0], [0.8, 0.2, 0.0]]),
            ("b", &[[0.0, 1.0, 0.0], [0.1, 1.0, 0.0]]),
            ("c", &[[0.0, 0.0, 1.0]]),
            ("d", &[[1.0, 1.0, 0.0], [1.0, 1.0, 0.1], [1.0, 1.0, 0.2], [1.0, 1.0, 0.3]]),
            ("e", &[[0.0, 1.0, 1.0]]),
        ]);

        let mut s = sampler(99);
        for _ in 0..200 {
            let set = s.select(&store, &query([0.0, 0.0], [0.0, 1.0, 0.05])).unwrap();
            let ids: HashSet<i64> = set.paths.iter().map(|p| owner[p]).collect();
            assert_eq!(ids.len(), 4);
            let unique: HashSet<&String> = set.paths.iter().collect();
            assert_eq!(unique.len(), 4);
        }
    }

    #[test]
    fn test_best_match_position_is_uniform() {
        let (store, _) = catalog(&[
            ("a", &[[1.0, 0.0, 0.0]]),
            ("b", &[[0.0, 1.0, 0.0]]),
            ("c", &[[0.0, 0.0, 1.0]]),
            ("d", &[[1.0, 1.0, 0.0]]),
            ("e", &[[0.0, 1.0, 1.0]]),
        ]);
        let q = query([0.0, 0.0], [1.0, 0.0, 0.0]);

        let runs = 4000;
        let mut slots = [0usize; 4];
        let mut s = sampler(2024);
        for _ in 0..runs {
            let set = s.select(&store, &q).unwrap();
            let pos = set.paths.iter().position(|p| *p == set.best_match).unwrap();
            slots[pos] += 1;
        }

        let expected = runs / 4;
        for (slot, &count) in slots.iter().enumerate() {
            assert!(
                count.abs_diff(expected) < expected / 5,
                "slot {slot} got {count} of {runs}: {slots:?}"
            );
        }
    }

    #[test]
    fn test_empty_catalog() {
        let (store, _) = catalog(&[]);
        let err = sampler(0).select(&store, &query([0.0, 0.0], [1.0, 0.0, 0.0])).unwrap_err();
        assert!(matches!(err, SamplerError::EmptyCatalog));
    }

    #[test]
    fn test_too_few_identities_for_narrowing() {
        let (store, _) = catalog(&[
            ("a", &[[1.0, 0.0, 0.0]]),
            ("b", &[[0.0, 1.0, 0.0]]),
            ("c", &[[0.0, 0.0, 1.0]]),
            ("d", &[[1.0, 1.0, 0.0]]),
        ]);
        let err = sampler(0).select(&store, &query([0.0, 0.0], [1.0, 0.0, 0.0])).unwrap_err();
        assert!(matches!(
            err,
            SamplerError::InsufficientIdentities { required: 5, available: 4 }
        ));
    }

    #[test]
    fn test_pool_without_enough_identities() {
        // Two identities have no frames, so only three remain in the pool.
        let (store, _) = catalog(&[
            ("a", &[[1.0, 0.0, 0.0], [0.5, 0.5, 0.0]]),
            ("b", &[[0.0, 1.0, 0.0]]),
            ("c", &[[0.0, 0.0, 1.0]]),
            ("d", &[]),
            ("e", &[]),
        ]);
        let err = sampler(0).select(&store, &query([0.0, 0.0], [1.0, 0.0, 0.0])).unwrap_err();
        assert!(matches!(
            err,
            SamplerError::InsufficientDistinctIdentities { required: 4, found: 3 }
        ));
    }

    #[test]
    fn test_no_frames_at_all() {
        let (store, _) = catalog(&[("a", &[]), ("b", &[]), ("c", &[]), ("d", &[]), ("e", &[])]);
        let err = sampler(0).select(&store, &query([0.0, 0.0], [1.0, 0.0, 0.0])).unwrap_err();
        assert!(matches!(err, SamplerError::EmptyPool));
    }

    #[test]
    fn test_degenerate_query_pose() {
        let (store, _) = catalog(&[
            ("a", &[[1.0, 0.0, 0.0]]),
            ("b", &[[0.0, 1.0, 0.0]]),
            ("c", &[[0.0, 0.0, 1.0]]),
            ("d", &[[1.0, 1.0, 0.0]]),
            ("e", &[[0.0, 1.0, 1.0]]),
        ]);
        let err = sampler(0).select(&store, &query([0.0, 0.0], [0.0, 0.0, 0.0])).unwrap_err();
        assert!(matches!(err, SamplerError::Match(MatchError::DegenerateVector { row: None })));
    }

    #[test]
    fn test_draw_ceiling_reports_failure() {
        // Four identities exist, but three of them share one frame in a pool of
        // thousands, so a tiny draw budget runs out.
        let mut pool: Vec<CandidateFrame> = (0..5000)
            .map(|i| frame(0, &format!("a/{i}"), [1.0, 0.0, 0.0]))
            .collect();
        pool.push(frame(1, "b/0", [0.0, 1.0, 0.0]));
        pool.push(frame(2, "c/0", [0.0, 0.0, 1.0]));
        pool.push(frame(3, "d/0", [1.0, 1.0, 0.0]));

        let mut s = DiverseSampler::new(
            SamplerConfig { max_draws: 3, ..SamplerConfig::default() },
            StdRng::seed_from_u64(5),
        );
        let err = s.pick_distractors(&pool, 0).unwrap_err();
        assert!(matches!(err, SamplerError::InsufficientDistinctIdentities { required: 4, .. }));
    }

    #[test]
    fn test_best_index_outside_pool() {
        let pool = vec![
            frame(0, "a/0", [1.0, 0.0, 0.0]),
            frame(1, "b/0", [0.0, 1.0, 0.0]),
            frame(2, "c/0", [0.0, 0.0, 1.0]),
            frame(3, "d/0", [1.0, 1.0, 0.0]),
        ];
        let err = sampler(3).pick_distractors(&pool, 4).unwrap_err();
        assert!(matches!(err, SamplerError::BestOutOfRange { best: 4, len: 4 }));

        let err = sampler(3).pick_distractors(&[], 0).unwrap_err();
        assert!(matches!(err, SamplerError::BestOutOfRange { best: 0, len: 0 }));
    }

    #[test]
    fn test_distractors_skip_best_identity() {
        let pool = vec![
            frame(0, "a/0", [1.0, 0.0, 0.0]),
            frame(0, "a/1", [1.0, 0.0, 0.0]),
            frame(1, "b/0", [0.0, 1.0, 0.0]),
            frame(2, "c/0", [0.0, 0.0, 1.0]),
            frame(3, "d/0", [1.0, 1.0, 0.0]),
        ];
        let mut s = sampler(3);
        for _ in 0..50 {
            let mut picked = s.pick_distractors(&pool, 0).unwrap();
            picked.sort_unstable();
            assert_eq!(picked, vec![2, 3, 4]);
        }
    }
}
