//! Offline catalog population.
//!
//! Walks every identity folder of a data directory, reads its manifest,
//! and stores one embedding per identity plus a pose/landmark row for each
//! usable frame. Frames without a detectable face or without landmarks are
//! skipped and counted; they never abort the build.

use crate::catalog::{CatalogError, CatalogStore, CatalogTransaction};
use crate::inference::FacePipeline;
use crate::manifest::{evenly_spaced, manifest_path, read_manifest, ManifestError};
use crate::types::IdentityId;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Yield below which a finished build logs a warning.
const LOW_YIELD_RATIO: f64 = 0.5;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("cannot list data directory {}: {source}", .path.display())]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildConfig {
    /// Process at most this many identity folders.
    pub num_people: Option<usize>,
    /// Sample at most this many manifest rows per identity.
    pub frames_per_person: Option<usize>,
}

/// Receives one call per processed manifest row.
pub trait BuildProgress {
    fn identity_started(&mut self, _index: usize, _total: usize, _name: &str, _rows: usize) {}
    fn row_processed(&mut self, index: usize, row: usize);
}

pub struct NoProgress;

impl BuildProgress for NoProgress {
    fn row_processed(&mut self, _index: usize, _row: usize) {}
}

/// Counters for one build run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub identities_stored: usize,
    pub identities_without_face: usize,
    pub rows_processed: usize,
    pub frames_stored: usize,
    pub skipped_no_face: usize,
    pub skipped_no_landmarks: usize,
    pub skipped_unreadable: usize,
    pub skipped_inference: usize,
}

impl BuildReport {
    pub fn frames_skipped(&self) -> usize {
        self.skipped_no_face
            + self.skipped_no_landmarks
            + self.skipped_unreadable
            + self.skipped_inference
    }

    /// Fraction of processed rows that produced a stored frame.
    pub fn yield_ratio(&self) -> f64 {
        if self.rows_processed == 0 {
            return 0.0;
        }
        self.frames_stored as f64 / self.rows_processed as f64
    }
}

enum FrameOutcome {
    Stored,
    NoFace,
    NoLandmarks,
    Unreadable,
    InferenceFailed,
}

pub struct CatalogBuilder {
    config: BuildConfig,
}

impl CatalogBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Populate `store` from `data_dir`. Each identity is committed as one
    /// transaction.
    pub fn build(
        &self,
        data_dir: &Path,
        store: &CatalogStore,
        pipeline: &mut FacePipeline<'_>,
        progress: &mut dyn BuildProgress,
    ) -> Result<BuildReport, BuildError> {
        let mut folders = identity_folders(data_dir)?;
        if let Some(cap) = self.config.num_people {
            folders.truncate(cap);
        }
        tracing::info!(dir = %data_dir.display(), identities = folders.len(), "build started");

        let mut report = BuildReport::default();
        for (index, folder) in folders.iter().enumerate() {
            let rows = read_manifest(&manifest_path(data_dir, folder))?;
            let selected = evenly_spaced(rows.len(), self.config.frames_per_person);
            progress.identity_started(index, folders.len(), folder, selected.len());

            let id = IdentityId(index as i64);
            let tx = store.transaction()?;
            let mut has_embedding = false;
            let stored_before = report.frames_stored;

            for (n, &row_idx) in selected.iter().enumerate() {
                let image_path = data_dir.join(&rows[row_idx].image_path);
                let outcome = process_frame(&tx, id, &image_path, pipeline, &mut has_embedding)?;
                report.rows_processed += 1;
                match outcome {
                    FrameOutcome::Stored => report.frames_stored += 1,
                    FrameOutcome::NoFace => report.skipped_no_face += 1,
                    FrameOutcome::NoLandmarks => report.skipped_no_landmarks += 1,
                    FrameOutcome::Unreadable => report.skipped_unreadable += 1,
                    FrameOutcome::InferenceFailed => report.skipped_inference += 1,
                }
                progress.row_processed(index, n);
            }
            tx.commit()?;

            if has_embedding {
                report.identities_stored += 1;
                tracing::info!(
                    identity = %id,
                    name = %folder,
                    frames = report.frames_stored - stored_before,
                    "identity stored"
                );
            } else {
                report.identities_without_face += 1;
                tracing::warn!(identity = %id, name = %folder, "no usable face; identity skipped");
            }
        }

        tracing::info!(
            identities = report.identities_stored,
            frames = report.frames_stored,
            skipped = report.frames_skipped(),
            "build finished"
        );
        if report.rows_processed > 0 && report.yield_ratio() < LOW_YIELD_RATIO {
            tracing::warn!(
                yield_ratio = report.yield_ratio(),
                no_face = report.skipped_no_face,
                no_landmarks = report.skipped_no_landmarks,
                "low frame yield"
            );
        }
        Ok(report)
    }
}

/// Sub-directory names of `data_dir`, sorted.
pub fn identity_folders(data_dir: &Path) -> Result<Vec<String>, BuildError> {
    let list_err = |source| BuildError::DataDir {
        path: data_dir.to_path_buf(),
        source,
    };

    let mut folders = Vec::new();
    for entry in std::fs::read_dir(data_dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        if entry.file_type().map_err(list_err)?.is_dir() {
            folders.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    folders.sort();
    Ok(folders)
}

/// Crop, embed (first usable face only), estimate pose, extract landmarks,
/// store. Only catalog failures propagate.
fn process_frame(
    tx: &CatalogTransaction<'_>,
    id: IdentityId,
    image_path: &Path,
    pipeline: &mut FacePipeline<'_>,
    has_embedding: &mut bool,
) -> Result<FrameOutcome, CatalogError> {
    let image = match image::open(image_path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            tracing::warn!(
                path = %image_path.display(),
                error = %e,
                "unreadable image; frame skipped"
            );
            return Ok(FrameOutcome::Unreadable);
        }
    };

    let inference_failed = |e: crate::inference::InferenceError| {
        tracing::warn!(path = %image_path.display(), error = %e, "inference failed; frame skipped");
        FrameOutcome::InferenceFailed
    };

    let face = match pipeline.crop_to_face(&image) {
        Ok(Some(face)) => face,
        Ok(None) => {
            tracing::debug!(path = %image_path.display(), "no face; frame skipped");
            return Ok(FrameOutcome::NoFace);
        }
        Err(e) => return Ok(inference_failed(e)),
    };

    if !*has_embedding {
        let embedding = match pipeline.embedder.embed(&face) {
            Ok(e) => e,
            Err(e) => return Ok(inference_failed(e)),
        };
        tx.insert_identity(id, &embedding)?;
        *has_embedding = true;
    }

    let pose = match pipeline.pose.estimate_pose(&face) {
        Ok(p) => p,
        Err(e) => return Ok(inference_failed(e)),
    };
    let landmarks = match pipeline.faces.extract_landmarks(&face) {
        Ok(Some(l)) => l,
        Ok(None) => {
            tracing::debug!(path = %image_path.display(), "no landmarks; frame skipped");
            return Ok(FrameOutcome::NoLandmarks);
        }
        Err(e) => return Ok(inference_failed(e)),
    };

    tx.insert_frame(id, &image_path.to_string_lossy(), &pose, &landmarks)?;
    Ok(FrameOutcome::Stored)
}
