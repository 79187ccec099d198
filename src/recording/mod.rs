//! Recordings and the dict form that describes how to rebuild them.
//!
//! A [`RecordingDict`] carries a class name plus an opaque `kwargs` payload;
//! [`load_recording`] validates that payload at the boundary and returns a
//! live [`Recording`] handle. Handles serialise back with
//! [`Recording::to_dict`], optionally with paths relative to a folder so the
//! dict stays valid when the folder is moved.

pub mod binary;
pub mod dtype;
pub mod filter;
pub mod zarr;

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use binary::BinaryRecording;
pub use dtype::Dtype;
pub use filter::HighpassFilterRecording;
pub use zarr::ZarrRecording;

use crate::codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("unknown recording class: {0}")]
    UnknownClass(String),
    #[error("missing kwarg '{0}'")]
    MissingKwarg(String),
    #[error("invalid kwarg '{name}': {reason}")]
    InvalidKwarg { name: String, reason: String },
    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),
    #[error("frames {start}..{end} out of bounds for {num_samples} samples")]
    OutOfBounds {
        start: usize,
        end: usize,
        num_samples: usize,
    },
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid metadata in {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to decode {}: {source}", path.display())]
    Codec { path: PathBuf, source: CodecError },
    #[error("corrupt chunk {}: {reason}", path.display())]
    CorruptChunk { path: PathBuf, reason: String },
}

impl RecordingError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| RecordingError::Io { path, source }
    }

    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        RecordingError::InvalidKwarg {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// A single-segment multichannel recording of integer samples.
pub trait Recording: Send + Sync {
    /// Short class name used in dicts and log lines.
    fn name(&self) -> &'static str;
    fn sampling_frequency(&self) -> f64;
    fn num_channels(&self) -> usize;
    fn num_samples(&self) -> usize;
    fn channel_ids(&self) -> Vec<String>;
    fn dtype(&self) -> Dtype;

    /// Time of the first sample in seconds. `None` means the clock starts at zero.
    fn t_start(&self) -> Option<f64>;

    /// Drop the embedded time base so samples are clocked from zero.
    fn reset_times(&mut self);

    /// Interleaved frames `start..end`, laid out as `frame * num_channels + channel`.
    fn get_traces(&self, start: usize, end: usize) -> Result<Vec<i32>, RecordingError>;

    /// Dict that [`load_recording`] turns back into an equivalent recording.
    /// Paths under `relative_to` are written relative to it.
    fn to_dict(&self, relative_to: Option<&Path>) -> RecordingDict;

    fn start_time(&self) -> f64 {
        self.t_start().unwrap_or(0.0)
    }

    fn duration(&self) -> f64 {
        self.num_samples() as f64 / self.sampling_frequency()
    }
}

impl fmt::Display for dyn Recording + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} channels - {:.1}kHz - {} samples - {:.2}s from t={:.3}s - {}",
            self.name(),
            self.num_channels(),
            self.sampling_frequency() / 1000.0,
            self.num_samples(),
            self.duration(),
            self.start_time(),
            self.dtype()
        )
    }
}

pub(crate) fn check_range(start: usize, end: usize, num_samples: usize) -> Result<(), RecordingError> {
    if start > end || end > num_samples {
        return Err(RecordingError::OutOfBounds {
            start,
            end,
            num_samples,
        });
    }
    Ok(())
}

/// Serialisable description of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingDict {
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    #[serde(default)]
    pub relative_paths: bool,
    /// Keys this crate does not interpret (annotations, properties, version...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecordingDict {
    pub fn new(class: &str, kwargs: Map<String, Value>, relative_paths: bool) -> Self {
        Self {
            class: class.to_string(),
            module: Some(env!("CARGO_PKG_NAME").to_string()),
            kwargs,
            relative_paths,
            extra: Map::new(),
        }
    }

    /// Class name without any module qualification.
    pub fn class_name(&self) -> &str {
        self.class.rsplit('.').next().unwrap_or(&self.class)
    }

    pub fn into_value(self) -> Value {
        let mut map = Map::new();
        map.insert("class".into(), Value::String(self.class));
        if let Some(module) = self.module {
            map.insert("module".into(), Value::String(module));
        }
        map.insert("kwargs".into(), Value::Object(self.kwargs));
        map.insert("relative_paths".into(), Value::Bool(self.relative_paths));
        for (key, value) in self.extra {
            map.entry(key).or_insert(value);
        }
        Value::Object(map)
    }

    pub(crate) fn kwarg(&self, name: &str) -> Result<&Value, RecordingError> {
        self.kwargs
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| RecordingError::MissingKwarg(name.to_string()))
    }

    pub(crate) fn kwarg_f64(&self, name: &str) -> Result<f64, RecordingError> {
        self.kwarg(name)?
            .as_f64()
            .ok_or_else(|| RecordingError::invalid(name, "expected a number"))
    }

    pub(crate) fn kwarg_f64_or(&self, name: &str, default: f64) -> Result<f64, RecordingError> {
        match self.kwargs.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(_) => self.kwarg_f64(name),
        }
    }

    pub(crate) fn kwarg_usize(&self, name: &str) -> Result<usize, RecordingError> {
        self.kwarg(name)?
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| RecordingError::invalid(name, "expected a non-negative integer"))
    }

    pub(crate) fn kwarg_str(&self, name: &str) -> Result<&str, RecordingError> {
        self.kwarg(name)?
            .as_str()
            .ok_or_else(|| RecordingError::invalid(name, "expected a string"))
    }

    /// Resolve a path kwarg against `base_folder` when the dict holds relative paths.
    pub(crate) fn resolve_path(&self, raw: &str, base_folder: &Path) -> PathBuf {
        let path = PathBuf::from(raw);
        if self.relative_paths && path.is_relative() {
            base_folder.join(path)
        } else {
            path
        }
    }
}

/// Express `path` relative to `relative_to` when it lives underneath it.
/// Returns the path string and whether it ended up relative.
pub(crate) fn relativize(path: &Path, relative_to: Option<&Path>) -> (String, bool) {
    match relative_to.and_then(|base| path.strip_prefix(base).ok()) {
        Some(rel) => (rel.to_string_lossy().into_owned(), true),
        None => (path.to_string_lossy().into_owned(), false),
    }
}

/// Build a live recording from its dict. Relative paths are resolved against
/// `base_folder`.
pub fn load_recording(
    dict: &RecordingDict,
    base_folder: &Path,
) -> Result<Box<dyn Recording>, RecordingError> {
    match dict.class_name() {
        BinaryRecording::CLASS => Ok(Box::new(BinaryRecording::from_dict(dict, base_folder)?)),
        ZarrRecording::CLASS => Ok(Box::new(ZarrRecording::from_dict(dict, base_folder)?)),
        HighpassFilterRecording::CLASS => Ok(Box::new(HighpassFilterRecording::from_dict(
            dict,
            base_folder,
        )?)),
        other => Err(RecordingError::UnknownClass(other.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use rand::{rngs::StdRng, Rng, SeedableRng};
    use serde_json::json;

    use super::{BinaryRecording, RecordingDict};

    /// Write a raw int16 recording into `dir` and return a dict relative to it.
    pub fn write_binary_fixture(
        dir: &Path,
        file_name: &str,
        num_samples: usize,
        num_channels: usize,
        t_start: Option<f64>,
    ) -> RecordingDict {
        let mut rng = StdRng::seed_from_u64(num_samples as u64 * 31 + num_channels as u64);
        let mut bytes = Vec::with_capacity(num_samples * num_channels * 2);
        for i in 0..num_samples {
            for ch in 0..num_channels {
                let drift = (i as f64 / 3000.0 + ch as f64).sin() * 800.0;
                let spike = ((i as f64 * 0.3).sin() * 150.0) as i32;
                let noise: i32 = rng.random_range(-30..30);
                let v = (drift as i32 + spike + noise) as i16;
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        std::fs::write(dir.join(file_name), bytes).unwrap();

        let dict = json!({
            "class": "spikeinterface.core.binaryrecordingextractor.BinaryRecordingExtractor",
            "module": "spikeinterface",
            "kwargs": {
                "file_paths": [file_name],
                "sampling_frequency": 30000.0,
                "num_channels": num_channels,
                "dtype": "int16",
                "t_starts": [t_start],
                "file_offset": 0
            },
            "relative_paths": true,
            "version": "0.100.0"
        });
        let dict: RecordingDict = serde_json::from_value(dict).unwrap();
        assert_eq!(dict.class_name(), BinaryRecording::CLASS);
        dict
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn dict_keeps_unknown_keys() {
        let value = json!({
            "class": "a.b.ZarrRecordingExtractor",
            "kwargs": {"folder_path": "x.zarr"},
            "relative_paths": true,
            "annotations": {"probe": "np2"},
            "version": "0.100.0"
        });
        let dict: RecordingDict = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(dict.class_name(), "ZarrRecordingExtractor");
        assert_eq!(dict.extra.len(), 2);
        assert_eq!(dict.into_value(), value);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let dict = RecordingDict::new("NwbRecordingExtractor", Map::new(), false);
        let err = load_recording(&dict, Path::new(".")).err().unwrap();
        assert!(matches!(err, RecordingError::UnknownClass(name) if name == "NwbRecordingExtractor"));
    }

    #[test]
    fn relativize_paths() {
        let base = Path::new("/results");
        assert_eq!(
            relativize(Path::new("/results/r1.zarr"), Some(base)),
            ("r1.zarr".to_string(), true)
        );
        assert_eq!(
            relativize(Path::new("/data/r1.raw"), Some(base)),
            ("/data/r1.raw".to_string(), false)
        );
        assert_eq!(
            relativize(Path::new("r1.raw"), None),
            ("r1.raw".to_string(), false)
        );
    }

    #[test]
    fn missing_and_null_kwargs() {
        let mut kwargs = Map::new();
        kwargs.insert("a".into(), Value::Null);
        kwargs.insert("b".into(), json!("text"));
        let dict = RecordingDict::new("X", kwargs, false);
        assert!(matches!(dict.kwarg("a"), Err(RecordingError::MissingKwarg(_))));
        assert_eq!(dict.kwarg_f64_or("a", 5.0).unwrap(), 5.0);
        assert!(matches!(
            dict.kwarg_f64("b"),
            Err(RecordingError::InvalidKwarg { .. })
        ));
    }
}
