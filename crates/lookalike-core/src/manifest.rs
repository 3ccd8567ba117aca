//! Per-identity frame manifests.
//!
//! Each identity folder `<data>/<name>/` is described by a sibling file
//! `<data>/<name>.labeled_faces.txt` with one comma-separated row per
//! frame. The first field is the frame's path relative to the data
//! directory (Windows separators allowed).

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_SUFFIX: &str = ".labeled_faces.txt";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("cannot read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    /// Frame path relative to the data directory, `/`-separated.
    pub image_path: String,
    /// Second column, if present.
    pub label: Option<String>,
}

pub fn manifest_path(data_dir: &Path, folder: &str) -> PathBuf {
    data_dir.join(format!("{folder}{MANIFEST_SUFFIX}"))
}

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_manifest(&text))
}

pub fn parse_manifest(text: &str) -> Vec<ManifestRow> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.split(',').map(str::trim);
            let image_path = fields.next().unwrap_or_default().replace('\\', "/");
            let label = fields.next().filter(|s| !s.is_empty()).map(str::to_string);
            ManifestRow { image_path, label }
        })
        .collect()
}

/// Row indices to process for a manifest of `len` rows.
///
/// With a cap smaller than `len`, picks `cap` indices spread evenly from
/// the first row to the last (`floor(i * (len - 1) / (cap - 1))`).
/// Otherwise every row is used.
pub fn evenly_spaced(len: usize, cap: Option<usize>) -> Vec<usize> {
    match cap {
        Some(k) if k < len => match k {
            0 => Vec::new(),
            1 => vec![0],
            _ => (0..k).map(|i| i * (len - 1) / (k - 1)).collect(),
        },
        _ => (0..len).collect(),
    }
}
