use std::path::PathBuf;

/// CLI defaults, loaded from environment variables. Flags override them.
#[derive(Debug)]
pub struct Config {
    /// Directory holding the default face detector model.
    pub model_dir: PathBuf,
    /// Catalog database used when `--catalog` is not given.
    pub catalog_path: PathBuf,
    /// Identity folders to process per build (0 = all).
    pub num_people: usize,
    /// Manifest rows to sample per identity (0 = all).
    pub frames_per_person: usize,
    /// Identities kept after embedding narrowing.
    pub narrow_count: usize,
    /// Upper bound on distractor draws per query.
    pub max_draws: usize,
    /// Fixed RNG seed for reproducible queries.
    pub seed: Option<u64>,
}

impl Config {
    /// Load configuration from `LOOKALIKE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str, default: usize| -> usize {
            var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        };

        let model_dir = var("LOOKALIKE_MODEL_DIR").map(PathBuf::from).unwrap_or_else(|| {
            var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("lookalike/models")
        });

        Self {
            model_dir,
            catalog_path: var("LOOKALIKE_CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("video_database.db")),
            num_people: parsed("LOOKALIKE_NUM_PEOPLE", 20),
            frames_per_person: parsed("LOOKALIKE_FRAMES_PER_PERSON", 20),
            narrow_count: parsed(
                "LOOKALIKE_NARROW_COUNT",
                lookalike_core::sampler::DEFAULT_NARROW_COUNT,
            ),
            max_draws: parsed("LOOKALIKE_MAX_DRAWS", lookalike_core::sampler::DEFAULT_MAX_DRAWS),
            seed: var("LOOKALIKE_SEED").and_then(|v| v.trim().parse().ok()),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }
}

/// `0` disables a cap.
pub fn cap(n: usize) -> Option<usize> {
    (n > 0).then_some(n)
}
