use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    str::FromStr,
};

use serde_json::{json, Map, Value};

use super::{check_range, relativize, Dtype, Recording, RecordingDict, RecordingError};

/// Raw interleaved samples in a flat binary file (`time_axis = 0`).
#[derive(Debug, Clone)]
pub struct BinaryRecording {
    file_path: PathBuf,
    sampling_frequency: f64,
    num_channels: usize,
    num_samples: usize,
    dtype: Dtype,
    file_offset: u64,
    channel_ids: Vec<String>,
    t_start: Option<f64>,
}

impl BinaryRecording {
    pub const CLASS: &'static str = "BinaryRecordingExtractor";

    pub fn open(
        file_path: PathBuf,
        sampling_frequency: f64,
        num_channels: usize,
        dtype: Dtype,
        file_offset: u64,
    ) -> Result<Self, RecordingError> {
        if num_channels == 0 {
            return Err(RecordingError::InvalidKwarg {
                name: "num_channels".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(sampling_frequency > 0.0) {
            return Err(RecordingError::InvalidKwarg {
                name: "sampling_frequency".into(),
                reason: format!("{} is not a positive frequency", sampling_frequency),
            });
        }

        let len = std::fs::metadata(&file_path)
            .map_err(RecordingError::io(&file_path))?
            .len();
        let frame_bytes = (num_channels * dtype.itemsize()) as u64;
        let num_samples = (len.saturating_sub(file_offset) / frame_bytes) as usize;

        Ok(Self {
            file_path,
            sampling_frequency,
            num_channels,
            num_samples,
            dtype,
            file_offset,
            channel_ids: (0..num_channels).map(|c| c.to_string()).collect(),
            t_start: None,
        })
    }

    pub fn from_dict(dict: &RecordingDict, base_folder: &Path) -> Result<Self, RecordingError> {
        let file_path = match dict.kwargs.get("file_paths") {
            Some(Value::Array(paths)) => match paths.as_slice() {
                [Value::String(path)] => path.as_str(),
                _ => {
                    return Err(RecordingError::InvalidKwarg {
                        name: "file_paths".into(),
                        reason: format!(
                            "expected exactly one file path, got {} (multi-segment recordings are not supported)",
                            paths.len()
                        ),
                    })
                }
            },
            Some(Value::String(path)) => path.as_str(),
            _ => dict.kwarg_str("file_path")?,
        };
        let file_path = dict.resolve_path(file_path, base_folder);

        let dtype_name = dict.kwarg_str("dtype")?;
        let dtype = Dtype::from_str(dtype_name)
            .map_err(|_| RecordingError::UnsupportedDtype(dtype_name.to_string()))?;

        if let Some(axis) = dict.kwargs.get("time_axis").and_then(Value::as_u64) {
            if axis != 0 {
                return Err(RecordingError::InvalidKwarg {
                    name: "time_axis".into(),
                    reason: "only time_axis=0 is supported".into(),
                });
            }
        }

        let file_offset = match dict.kwargs.get("file_offset") {
            None | Some(Value::Null) => 0,
            Some(_) => dict.kwarg_usize("file_offset")? as u64,
        };

        let mut recording = Self::open(
            file_path,
            dict.kwarg_f64("sampling_frequency")?,
            dict.kwarg_usize("num_channels")?,
            dtype,
            file_offset,
        )?;

        recording.t_start = dict
            .kwargs
            .get("t_starts")
            .and_then(Value::as_array)
            .and_then(|starts| starts.first())
            .and_then(Value::as_f64);

        if let Some(ids) = dict.kwargs.get("channel_ids").and_then(Value::as_array) {
            if ids.len() != recording.num_channels {
                return Err(RecordingError::InvalidKwarg {
                    name: "channel_ids".into(),
                    reason: format!(
                        "{} ids for {} channels",
                        ids.len(),
                        recording.num_channels
                    ),
                });
            }
            recording.channel_ids = ids
                .iter()
                .map(|id| match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
        }

        Ok(recording)
    }
}

impl Recording for BinaryRecording {
    fn name(&self) -> &'static str {
        Self::CLASS
    }

    fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn num_samples(&self) -> usize {
        self.num_samples
    }

    fn channel_ids(&self) -> Vec<String> {
        self.channel_ids.clone()
    }

    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn t_start(&self) -> Option<f64> {
        self.t_start
    }

    fn reset_times(&mut self) {
        self.t_start = None;
    }

    fn get_traces(&self, start: usize, end: usize) -> Result<Vec<i32>, RecordingError> {
        check_range(start, end, self.num_samples)?;

        let frame_bytes = self.num_channels * self.dtype.itemsize();
        let mut bytes = vec![0u8; (end - start) * frame_bytes];
        let mut file = File::open(&self.file_path).map_err(RecordingError::io(&self.file_path))?;
        file.seek(SeekFrom::Start(
            self.file_offset + (start * frame_bytes) as u64,
        ))
        .and_then(|_| file.read_exact(&mut bytes))
        .map_err(RecordingError::io(&self.file_path))?;

        let mut traces = Vec::with_capacity((end - start) * self.num_channels);
        self.dtype.read_le(&bytes, &mut traces);
        Ok(traces)
    }

    fn to_dict(&self, relative_to: Option<&Path>) -> RecordingDict {
        let (file_path, relative) = relativize(&self.file_path, relative_to);
        let mut kwargs = Map::new();
        kwargs.insert("file_paths".into(), json!([file_path]));
        kwargs.insert("sampling_frequency".into(), json!(self.sampling_frequency));
        kwargs.insert("num_channels".into(), json!(self.num_channels));
        kwargs.insert("dtype".into(), json!(self.dtype.to_string()));
        kwargs.insert("t_starts".into(), json!([self.t_start]));
        kwargs.insert("channel_ids".into(), json!(self.channel_ids));
        kwargs.insert("time_axis".into(), json!(0));
        kwargs.insert("file_offset".into(), json!(self.file_offset));
        RecordingDict::new(Self::CLASS, kwargs, relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{load_recording, testing::write_binary_fixture};

    #[test]
    fn loads_relative_to_base_folder() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_binary_fixture(dir.path(), "rec.raw", 1000, 4, Some(12.5));

        let recording = load_recording(&dict, dir.path()).unwrap();
        assert_eq!(recording.num_samples(), 1000);
        assert_eq!(recording.num_channels(), 4);
        assert_eq!(recording.dtype(), Dtype::Int16);
        assert_eq!(recording.t_start(), Some(12.5));
        assert_eq!(recording.channel_ids(), vec!["0", "1", "2", "3"]);

        let traces = recording.get_traces(10, 20).unwrap();
        assert_eq!(traces.len(), 40);
        let all = recording.get_traces(0, 1000).unwrap();
        assert_eq!(&all[40..80], traces.as_slice());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_binary_fixture(dir.path(), "rec.raw", 10, 1, None);
        let other = tempfile::tempdir().unwrap();
        let err = load_recording(&dict, other.path()).err().unwrap();
        assert!(matches!(err, RecordingError::Io { .. }));
    }

    #[test]
    fn rejects_float_dtype_and_bad_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut dict = write_binary_fixture(dir.path(), "rec.raw", 100, 2, None);

        let recording = load_recording(&dict, dir.path()).unwrap();
        assert!(matches!(
            recording.get_traces(90, 101),
            Err(RecordingError::OutOfBounds { .. })
        ));

        dict.kwargs.insert("dtype".into(), json!("float32"));
        assert!(matches!(
            load_recording(&dict, dir.path()).err().unwrap(),
            RecordingError::UnsupportedDtype(_)
        ));
    }

    #[test]
    fn dict_round_trip_keeps_paths_relative() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_binary_fixture(dir.path(), "rec.raw", 64, 2, Some(1.0));
        let recording = load_recording(&dict, dir.path()).unwrap();

        let out = recording.to_dict(Some(dir.path()));
        assert!(out.relative_paths);
        assert_eq!(out.kwargs["file_paths"], json!(["rec.raw"]));

        let reloaded = load_recording(&out, dir.path()).unwrap();
        assert_eq!(reloaded.num_samples(), 64);
        assert_eq!(reloaded.t_start(), Some(1.0));
    }
}
