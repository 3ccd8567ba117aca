mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::{cap, Config};
use lookalike_core::{
    prepare_query, ArrayCodec, BuildConfig, BuildProgress, CatalogBuilder, CatalogStore,
    DiverseSampler, FacePipeline, SamplerConfig,
};
use lookalike_models::{FacenetEmbedder, OnnxPoseEstimator, ScrfdDetector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "lookalike", about = "Face stimulus selection for matching studies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Populate a catalog from a directory of identity folders
    Build {
        /// Directory with one sub-folder and one `.labeled_faces.txt` manifest per identity
        data_dir: PathBuf,
        /// FaceNet-style embedding model (ONNX)
        embedder_model: PathBuf,
        /// Head-pose model (ONNX)
        pose_model: PathBuf,
        /// Catalog database to write
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// SCRFD face detector model (ONNX)
        #[arg(long)]
        detector: Option<PathBuf>,
        /// Identity folders to process (0 = all)
        #[arg(long)]
        num_people: Option<usize>,
        /// Frames to sample per identity (0 = all)
        #[arg(long)]
        frames_per_person: Option<usize>,
        /// Print the build report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pick the best-matching frame and three distractors for a query photo
    Query {
        /// Catalog database produced by `build`
        catalog: PathBuf,
        /// FaceNet-style embedding model (ONNX)
        embedder_model: PathBuf,
        /// Head-pose model (ONNX)
        pose_model: PathBuf,
        /// Query photo
        image: PathBuf,
        /// SCRFD face detector model (ONNX)
        #[arg(long)]
        detector: Option<PathBuf>,
        /// RNG seed for a reproducible selection
        #[arg(long)]
        seed: Option<u64>,
        /// Identities kept after embedding narrowing
        #[arg(long)]
        narrow: Option<usize>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
        /// Include the best match in JSON output
        #[arg(long, requires = "json")]
        reveal: bool,
    },
    /// Show catalog counts
    Info {
        /// Catalog database
        catalog: PathBuf,
    },
}

/// Logs per-identity build progress.
struct LogProgress;

impl BuildProgress for LogProgress {
    fn identity_started(&mut self, index: usize, total: usize, name: &str, rows: usize) {
        tracing::info!(identity = index + 1, total, name, rows, "processing identity");
    }

    fn row_processed(&mut self, index: usize, row: usize) {
        tracing::debug!(identity = index + 1, row, "row processed");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Build {
            data_dir,
            embedder_model,
            pose_model,
            catalog,
            detector,
            num_people,
            frames_per_person,
            json,
        } => {
            let detector = detector.unwrap_or_else(|| config.detector_model_path());
            let catalog = catalog.unwrap_or_else(|| config.catalog_path.clone());
            let build_config = BuildConfig {
                num_people: cap(num_people.unwrap_or(config.num_people)),
                frames_per_person: cap(frames_per_person.unwrap_or(config.frames_per_person)),
            };

            let mut faces = ScrfdDetector::load(&detector).context("loading face detector")?;
            let mut embedder =
                FacenetEmbedder::load(&embedder_model).context("loading embedding model")?;
            let mut pose = OnnxPoseEstimator::load(&pose_model).context("loading pose model")?;
            let store = CatalogStore::open(&catalog, ArrayCodec::new())
                .with_context(|| format!("opening catalog {}", catalog.display()))?;

            let mut pipeline = FacePipeline::new(&mut faces, &mut embedder, &mut pose);
            let report = CatalogBuilder::new(build_config)
                .build(&data_dir, &store, &mut pipeline, &mut LogProgress)
                .context("building catalog")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "stored {} identities and {} frames in {} ({} rows skipped)",
                    report.identities_stored,
                    report.frames_stored,
                    catalog.display(),
                    report.frames_skipped()
                );
            }
        }
        Commands::Query {
            catalog,
            embedder_model,
            pose_model,
            image,
            detector,
            seed,
            narrow,
            json,
            reveal,
        } => {
            let store = open_existing(&catalog)?;
            let detector = detector.unwrap_or_else(|| config.detector_model_path());
            let mut faces = ScrfdDetector::load(&detector).context("loading face detector")?;
            let mut embedder =
                FacenetEmbedder::load(&embedder_model).context("loading embedding model")?;
            let mut pose = OnnxPoseEstimator::load(&pose_model).context("loading pose model")?;

            let photo = image::open(&image)
                .with_context(|| format!("reading query image {}", image.display()))?
                .to_rgb8();
            let mut pipeline = FacePipeline::new(&mut faces, &mut embedder, &mut pose);
            let query = prepare_query(&photo, &mut pipeline).context("analysing query image")?;

            let rng = match seed.or(config.seed) {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let sampler_config = SamplerConfig {
                narrow_count: narrow.unwrap_or(config.narrow_count),
                max_draws: config.max_draws,
                ..SamplerConfig::default()
            };
            let stimuli = DiverseSampler::new(sampler_config, rng)
                .select(&store, &query)
                .context("selecting stimuli")?;

            if reveal {
                let out = serde_json::json!({
                    "paths": stimuli.paths,
                    "best_match": stimuli.best_match,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if json {
                println!("{}", serde_json::to_string_pretty(&stimuli.paths)?);
            } else {
                for path in &stimuli.paths {
                    println!("{path}");
                }
            }
        }
        Commands::Info { catalog } => {
            let store = open_existing(&catalog)?;
            let stats = store.stats().context("reading catalog counts")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

/// Open a catalog that must already exist; opening would otherwise create
/// an empty one.
fn open_existing(path: &Path) -> Result<CatalogStore> {
    if !path.exists() {
        bail!("catalog not found: {}", path.display());
    }
    CatalogStore::open(path, ArrayCodec::new())
        .with_context(|| format!("opening catalog {}", path.display()))
}
