use std::path::{Path, PathBuf};

use log::{debug, warn};
use tokio::fs;

use super::{format::DescriptorFormat, JobDescriptor};
use crate::error::PipelineError;

/// File-name marker of a job descriptor.
pub const JOB_MARKER: &str = "job";

/// A descriptor file found in the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFile {
    pub path: PathBuf,
    pub format: DescriptorFormat,
}

impl JobFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub async fn read(&self) -> Result<JobDescriptor, PipelineError> {
        let bytes = fs::read(&self.path)
            .await
            .map_err(|e| self.discovery_error(e.to_string()))?;
        self.format
            .parse(&bytes)
            .map_err(|reason| self.discovery_error(reason))
    }

    fn discovery_error(&self, reason: String) -> PipelineError {
        PipelineError::Discovery {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Job descriptors directly inside `dir`, sorted by file name.
pub async fn discover_jobs(dir: &Path) -> Result<Vec<JobFile>, PipelineError> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| PipelineError::Discovery {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut jobs = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                return Err(PipelineError::Discovery {
                    path: dir.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.contains(JOB_MARKER) {
            continue;
        }
        let path = entry.path();
        match entry.file_type().await {
            Ok(t) if t.is_file() => {}
            _ => {
                debug!("skipping {}: not a regular file", path.display());
                continue;
            }
        }

        match DescriptorFormat::from_path(&path) {
            Some(format) => jobs.push(JobFile { path, format }),
            None => warn!("skipping {}: unsupported descriptor format", path.display()),
        }
    }

    jobs.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use std::fs as std_fs;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn finds_descriptors_one_level_deep() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["job_b.json", "job_a.pkl", "old_job.pickle", "job.yaml", "notes.json"] {
            std_fs::write(dir.path().join(name), b"{}").unwrap();
        }
        std_fs::create_dir(dir.path().join("jobs")).unwrap();
        std_fs::write(dir.path().join("jobs").join("job_c.json"), b"{}").unwrap();

        let names: Vec<_> = discover_jobs(dir.path())
            .await
            .unwrap()
            .iter()
            .map(JobFile::file_name)
            .collect();
        assert_eq!(names, ["job_a.pkl", "job_b.json", "old_job.pickle"]);
    }

    #[tokio::test]
    async fn empty_directory_has_no_jobs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_jobs(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_directory_is_a_discovery_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover_jobs(&dir.path().join("absent")).await;
        assert!(matches!(result, Err(PipelineError::Discovery { .. })));
    }

    #[tokio::test]
    async fn reads_json_and_pickle_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let value = json!({
            "session_name": "s1",
            "recording_name": "r1",
            "recording_dict": {"class": "ZarrRecordingExtractor", "kwargs": {"folder_path": "r1.zarr"}}
        });
        std_fs::write(
            dir.path().join("job_0.json"),
            serde_json::to_vec(&value).unwrap(),
        )
        .unwrap();
        std_fs::write(
            dir.path().join("job_1.pkl"),
            serde_pickle::to_vec(&value, serde_pickle::SerOptions::new()).unwrap(),
        )
        .unwrap();

        let jobs = discover_jobs(dir.path()).await.unwrap();
        let json_job = jobs[0].read().await.unwrap();
        let pickle_job = jobs[1].read().await.unwrap();
        assert_eq!(json_job, pickle_job);
        assert_eq!(json_job.recording_name, "r1");
    }

    #[tokio::test]
    async fn incomplete_descriptor_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_0.json");
        std_fs::write(&path, br#"{"session_name": "s1"}"#).unwrap();

        let jobs = discover_jobs(dir.path()).await.unwrap();
        match jobs[0].read().await {
            Err(PipelineError::Discovery { path: p, reason }) => {
                assert_eq!(p, path);
                assert!(reason.contains("recording_name"), "{}", reason);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
