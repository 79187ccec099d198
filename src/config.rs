use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::Parser;
use log::info;

use crate::error::PipelineError;

/// File-name marker of the bits-per-sample override dropped into the input dir.
pub const BPS_OVERRIDE_MARKER: &str = "bps";
pub const BPS_OVERRIDE_EXTENSION: &str = "txt";

/// Environment variables read for the worker count, first present wins.
pub const PARALLELISM_ENV_VARS: [&str; 2] = ["CO_CPUS", "SLURM_CPUS_ON_NODE"];

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ephys-compressor",
    version,
    about = "Compress electrophysiology recordings referenced by job descriptors"
)]
pub struct Args {
    /// WavPack bits per sample (empty for lossless)
    #[arg(long, conflicts_with = "static_bps")]
    pub bps: Option<String>,

    /// WavPack bits per sample (empty for lossless)
    #[arg(value_name = "STATIC_BPS")]
    pub static_bps: Option<String>,

    /// Highpass filter the recordings before compression
    #[arg(
        long,
        num_args = 0..=1,
        default_missing_value = "true",
        conflicts_with = "static_highpass"
    )]
    pub highpass: Option<String>,

    /// Highpass filter the recordings before compression ("true"/"false").
    /// Positional values bind in order, so this one needs a positional
    /// STATIC_BPS before it; combine `--bps` with `--highpass` instead.
    #[arg(value_name = "STATIC_HIGHPASS")]
    pub static_highpass: Option<String>,

    /// Directory holding job descriptors and the optional bps override
    #[arg(long, default_value = "../data")]
    pub data_dir: PathBuf,

    #[arg(long, default_value = "../scratch")]
    pub scratch_dir: PathBuf,

    /// Directory receiving compressed stores and rewritten descriptors
    #[arg(long, default_value = "../results")]
    pub results_dir: PathBuf,

    /// Seconds of data per compressed chunk
    #[arg(long, default_value_t = 1.0)]
    pub chunk_duration: f64,
}

/// Run-wide settings, resolved once before any job runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub bits_per_sample: Option<f64>,
    pub highpass_enabled: bool,
    /// Worker threads for the storage layer, `-1` for all available.
    pub parallelism: i64,
    pub data_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub results_dir: PathBuf,
    pub chunk_duration: f64,
}

impl ResolvedConfig {
    /// Resolve the configuration from parsed arguments, the input directory
    /// and the environment (passed in as a lookup function).
    pub fn resolve<F>(args: &Args, env: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let override_value = match find_bps_override(&args.data_dir)? {
            Some(path) => {
                info!("Using bps override from {}", path.display());
                Some(fs::read_to_string(&path).map_err(|e| {
                    PipelineError::config(format!("failed to read {}: {}", path.display(), e))
                })?)
            }
            None => None,
        };

        let bits_per_sample = resolve_bps(
            args.bps.as_deref(),
            args.static_bps.as_deref(),
            override_value.as_deref(),
        )?;

        if !(args.chunk_duration > 0.0 && args.chunk_duration.is_finite()) {
            return Err(PipelineError::config(format!(
                "chunk duration must be positive, got {}",
                args.chunk_duration
            )));
        }

        if directories_overlap(&args.data_dir, &args.results_dir) {
            return Err(PipelineError::config(format!(
                "results directory {} overlaps the input directory {}",
                args.results_dir.display(),
                args.data_dir.display()
            )));
        }

        Ok(Self {
            bits_per_sample,
            highpass_enabled: resolve_highpass(
                args.highpass.as_deref(),
                args.static_highpass.as_deref(),
            ),
            parallelism: resolve_parallelism(env)?,
            data_dir: args.data_dir.clone(),
            scratch_dir: args.scratch_dir.clone(),
            results_dir: args.results_dir.clone(),
            chunk_duration: args.chunk_duration,
        })
    }

    /// Frames per chunk for a recording sampled at `sampling_frequency`.
    pub fn chunk_frames(&self, sampling_frequency: f64) -> usize {
        ((self.chunk_duration * sampling_frequency).round() as usize).max(1)
    }
}

/// Flag, then positional, then the override file contents. The override is
/// authoritative whenever present, even if empty.
pub fn resolve_bps(
    flag: Option<&str>,
    positional: Option<&str>,
    override_value: Option<&str>,
) -> Result<Option<f64>, PipelineError> {
    let cli = flag
        .filter(|s| !s.is_empty())
        .or(positional.filter(|s| !s.is_empty()))
        .unwrap_or("");
    let raw = override_value.unwrap_or(cli).trim();

    if raw.is_empty() {
        return Ok(None);
    }
    let bps: f64 = raw
        .parse()
        .map_err(|_| PipelineError::config(format!("invalid bps value '{}'", raw)))?;
    if !bps.is_finite() || bps <= 0.0 {
        return Err(PipelineError::config(format!(
            "bps must be a positive number, got {}",
            bps
        )));
    }
    Ok(Some(bps))
}

pub fn resolve_highpass(flag: Option<&str>, positional: Option<&str>) -> bool {
    flag.or(positional)
        .unwrap_or("false")
        .trim()
        .eq_ignore_ascii_case("true")
}

pub fn resolve_parallelism<F>(env: F) -> Result<i64, PipelineError>
where
    F: Fn(&str) -> Option<String>,
{
    for name in PARALLELISM_ENV_VARS {
        if let Some(value) = env(name) {
            let n_jobs: i64 = value.trim().parse().map_err(|_| {
                PipelineError::config(format!("{} must be an integer, got '{}'", name, value))
            })?;
            if n_jobs == 0 || n_jobs < -1 {
                return Err(PipelineError::config(format!(
                    "{} must be positive or -1, got {}",
                    name, n_jobs
                )));
            }
            return Ok(n_jobs);
        }
    }
    Ok(-1)
}

/// The single `*bps*.txt` file in `dir`, if any.
pub fn find_bps_override(dir: &Path) -> Result<Option<PathBuf>, PipelineError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        PipelineError::config(format!("cannot read input directory {}: {}", dir.display(), e))
    })?;

    let mut matches = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_override = path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(BPS_OVERRIDE_MARKER))
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == BPS_OVERRIDE_EXTENSION);
        if is_override {
            matches.push(path);
        }
    }

    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        n => Err(PipelineError::config(format!(
            "found {} bps override files in {}, expected at most one",
            n,
            dir.display()
        ))),
    }
}

/// Whether one directory is the other or lies inside it. Paths that do not
/// exist yet are compared through their closest existing ancestor.
pub fn directories_overlap(a: &Path, b: &Path) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    a.starts_with(&b) || b.starts_with(&a)
}

fn normalize(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut existing = path;
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = if parent.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent
                };
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Size the global rayon pool once. Returns the number of worker threads.
pub fn install_thread_pool(parallelism: i64) -> Result<usize, PipelineError> {
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("compress-{}", i));
    if parallelism > 0 {
        builder = builder.num_threads(parallelism as usize);
    }
    builder
        .build_global()
        .map_err(|e| PipelineError::config(format!("failed to start worker pool: {}", e)))?;
    Ok(rayon::current_num_threads())
}
