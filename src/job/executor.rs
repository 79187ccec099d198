use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{error, info};
use serde::Serialize;

use super::{discovery::discover_jobs, JobDescriptor};
use crate::{
    codec::WavPackCodec,
    config::ResolvedConfig,
    error::{error_chain, PipelineError},
    fs_ops,
    recording::{load_recording, HighpassFilterRecording, Recording},
    store::{self, STORE_EXTENSION},
};

/// What a successful job left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub recording_name: String,
    pub store_path: PathBuf,
    pub descriptor_path: PathBuf,
    pub compression_ratio: f64,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<JobOutcome>,
    pub failed: Vec<(PathBuf, PipelineError)>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run one job end to end: load, optionally reset times and highpass filter,
/// compress into `<results>/<recording_name>.zarr`, then write the rewritten
/// descriptor to `<results>/<descriptor stem>.json`.
pub fn execute_job(
    job: &JobDescriptor,
    descriptor_path: &Path,
    config: &ResolvedConfig,
) -> Result<JobOutcome, PipelineError> {
    let started = Instant::now();
    let name = &job.recording_name;

    let mut recording = load_recording(&job.recording_dict, &config.data_dir).map_err(
        |source| PipelineError::Load {
            recording_name: name.clone(),
            source,
        },
    )?;
    info!("{}", recording);

    if job.skip_times() {
        info!("\tResetting recording timestamps");
        recording.reset_times();
    }

    if config.highpass_enabled {
        info!("\tApplying highpass filter");
        recording = Box::new(HighpassFilterRecording::with_defaults(recording).map_err(
            |source| PipelineError::Preprocess {
                recording_name: name.clone(),
                source,
            },
        )?);
    }

    let codec = WavPackCodec::new(config.bits_per_sample)
        .map_err(|e| PipelineError::config(e.to_string()))?;
    let store_path = config
        .results_dir
        .join(format!("{}.{}", name, STORE_EXTENSION));
    let chunk_frames = config.chunk_frames(recording.sampling_frequency());

    let compressed = store::save_recording(recording.as_ref(), &store_path, &codec, chunk_frames)
        .map_err(|e| PipelineError::persist(&store_path, e))?;
    let compression_ratio = compressed.compression_ratio().ok_or_else(|| {
        PipelineError::persist(&store_path, "store is missing its compression ratio")
    })?;
    info!("\tCompression ratio: {:.3}", compression_ratio);

    let rewritten = job.with_recording_dict(compressed.to_dict(Some(&config.results_dir)));
    let output_path = output_descriptor_path(descriptor_path, &config.results_dir);
    let bytes = to_json_pretty(&rewritten).map_err(|e| PipelineError::persist(&output_path, e))?;
    fs_ops::write_file_atomic(&output_path, &bytes)
        .map_err(|e| PipelineError::persist(&output_path, e))?;

    Ok(JobOutcome {
        recording_name: name.clone(),
        store_path,
        descriptor_path: output_path,
        compression_ratio,
        elapsed: started.elapsed(),
    })
}

fn output_descriptor_path(input: &Path, results_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string());
    results_dir.join(format!("{}.json", stem))
}

/// Descriptors are written with a four space indent.
fn to_json_pretty<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}

/// Discover and run every job in the input directory.
///
/// Jobs run one after the other. A job that fails is logged and counted and
/// the batch moves on; only a failure to list the input directory aborts the
/// run.
pub async fn run(config: &ResolvedConfig) -> Result<BatchSummary, PipelineError> {
    let started = Instant::now();
    let job_files = discover_jobs(&config.data_dir).await?;
    info!("Found {} configurations", job_files.len());

    let config = Arc::new(config.clone());
    let mut summary = BatchSummary::default();
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();

    for file in job_files {
        let output_path = output_descriptor_path(&file.path, &config.results_dir);
        if let Some(earlier) = claimed.get(&output_path) {
            let e = PipelineError::Discovery {
                path: file.path.clone(),
                reason: format!(
                    "output {} is already written by {}",
                    output_path.display(),
                    earlier.display()
                ),
            };
            error!("{}", error_chain(&e));
            summary.failed.push((file.path, e));
            continue;
        }
        claimed.insert(output_path, file.path.clone());

        let job = match file.read().await {
            Ok(job) => job,
            Err(e) => {
                error!("{}", error_chain(&e));
                summary.failed.push((file.path, e));
                continue;
            }
        };
        info!(
            "Compressing recording {} from session {} ({})",
            job.recording_name,
            job.session_name,
            file.file_name()
        );

        let worker_config = Arc::clone(&config);
        let path = file.path.clone();
        let result = tokio::task::spawn_blocking(move || execute_job(&job, &path, &worker_config))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(outcome) => {
                info!(
                    "\tCompressed {} in {:.2}s (ratio {:.3}): {} -> {}",
                    outcome.recording_name,
                    outcome.elapsed.as_secs_f64(),
                    outcome.compression_ratio,
                    outcome.store_path.display(),
                    outcome.descriptor_path.display()
                );
                summary.succeeded.push(outcome);
            }
            Err(e) => {
                error!("Job {} failed: {}", file.file_name(), error_chain(&e));
                summary.failed.push((file.path, e));
            }
        }
    }

    info!(
        "Compressed {} of {} recordings in {:.2}s",
        summary.succeeded.len(),
        summary.succeeded.len() + summary.failed.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(summary)
}
