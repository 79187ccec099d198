use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use super::{check_range, relativize, Dtype, Recording, RecordingDict, RecordingError};
use crate::{
    codec::WavPackCodec,
    store::{self, ArrayMetadata, RootAttributes, ARRAY_METADATA, ROOT_ATTRS, TRACES_ARRAY},
};

/// Read-only view of a store written by [`store::save_recording`].
#[derive(Debug, Clone)]
pub struct ZarrRecording {
    folder: PathBuf,
    attrs: RootAttributes,
    array: ArrayMetadata,
    dtype: Dtype,
    codec: WavPackCodec,
    t_start: Option<f64>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RecordingError> {
    let bytes = fs::read(path).map_err(RecordingError::io(path))?;
    serde_json::from_slice(&bytes).map_err(|source| RecordingError::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

impl ZarrRecording {
    pub const CLASS: &'static str = "ZarrRecordingExtractor";

    pub fn open(folder: &Path) -> Result<Self, RecordingError> {
        let attrs: RootAttributes = read_json(&folder.join(ROOT_ATTRS))?;
        let array_path = folder.join(TRACES_ARRAY).join(ARRAY_METADATA);
        let array: ArrayMetadata = read_json(&array_path)?;

        let dtype = Dtype::from_str(&array.dtype)
            .map_err(|_| RecordingError::UnsupportedDtype(array.dtype.clone()))?;
        let codec = WavPackCodec::from_config(&array.compressor).map_err(|source| {
            RecordingError::Codec {
                path: array_path.clone(),
                source,
            }
        })?;
        if array.chunks[0] == 0 || array.shape[1] != attrs.channel_ids.len() {
            return Err(RecordingError::InvalidKwarg {
                name: "folder_path".into(),
                reason: format!(
                    "inconsistent store metadata in {}: shape {:?}, chunks {:?}, {} channel ids",
                    folder.display(),
                    array.shape,
                    array.chunks,
                    attrs.channel_ids.len()
                ),
            });
        }

        let t_start = attrs.t_starts.first().copied().flatten();
        Ok(Self {
            folder: folder.to_path_buf(),
            attrs,
            array,
            dtype,
            codec,
            t_start,
        })
    }

    pub fn from_dict(dict: &RecordingDict, base_folder: &Path) -> Result<Self, RecordingError> {
        let folder = dict.resolve_path(dict.kwarg_str("folder_path")?, base_folder);
        Self::open(&folder)
    }

    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.attrs.annotations.get(key)
    }

    pub fn compression_ratio(&self) -> Option<f64> {
        self.annotation(store::COMPRESSION_RATIO)
            .and_then(Value::as_f64)
    }
}

impl Recording for ZarrRecording {
    fn name(&self) -> &'static str {
        Self::CLASS
    }

    fn sampling_frequency(&self) -> f64 {
        self.attrs.sampling_frequency
    }

    fn num_channels(&self) -> usize {
        self.array.shape[1]
    }

    fn num_samples(&self) -> usize {
        self.array.shape[0]
    }

    fn channel_ids(&self) -> Vec<String> {
        self.attrs.channel_ids.clone()
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
        check_range(start, end, self.num_samples())?;
        let num_channels = self.num_channels();
        let chunk_frames = self.array.chunks[0];
        let mut traces = Vec::with_capacity((end - start) * num_channels);
        if start == end {
            return Ok(traces);
        }

        for index in start / chunk_frames..=(end - 1) / chunk_frames {
            let path = store::chunk_path(&self.folder, index);
            let bytes = fs::read(&path).map_err(RecordingError::io(&path))?;
            let codec_error = |source| RecordingError::Codec {
                path: path.clone(),
                source,
            };

            // check the header before decoding so a bad chunk cannot size the buffer
            let chunk_start = index * chunk_frames;
            let expected_len = chunk_frames.min(self.num_samples() - chunk_start);
            let header = self.codec.read_header(&bytes).map_err(codec_error)?;
            if header.num_channels != num_channels
                || header.dtype != self.dtype
                || header.num_frames != expected_len
            {
                return Err(RecordingError::CorruptChunk {
                    path: path.clone(),
                    reason: format!(
                        "chunk holds {} frames x {} channels of {}",
                        header.num_frames, header.num_channels, header.dtype
                    ),
                });
            }
            let chunk = self.codec.decode(&bytes).map_err(codec_error)?;
            let chunk_len = header.num_frames;

            let from = start.max(chunk_start) - chunk_start;
            let to = end.min(chunk_start + chunk_len) - chunk_start;
            traces.extend_from_slice(&chunk.frames[from * num_channels..to * num_channels]);
        }

        Ok(traces)
    }

    fn to_dict(&self, relative_to: Option<&Path>) -> RecordingDict {
        let (folder_path, relative) = relativize(&self.folder, relative_to);
        let mut kwargs = Map::new();
        kwargs.insert("folder_path".into(), json!(folder_path));
        let mut dict = RecordingDict::new(Self::CLASS, kwargs, relative);
        dict.extra
            .insert("annotations".into(), Value::Object(self.attrs.annotations.clone()));
        dict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        recording::{load_recording, testing::write_binary_fixture},
        store::save_recording,
    };

    #[test]
    fn reopens_from_relative_dict() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_binary_fixture(dir.path(), "rec.raw", 1200, 2, Some(3.0));
        let source = load_recording(&dict, dir.path()).unwrap();
        let folder = dir.path().join("rec.zarr");
        let mut saved =
            save_recording(source.as_ref(), &folder, &WavPackCodec::lossless(), 500).unwrap();

        let out = saved.to_dict(Some(dir.path()));
        assert!(out.relative_paths);
        assert_eq!(out.kwargs["folder_path"], json!("rec.zarr"));
        assert!(out.extra["annotations"]["compression_ratio"].is_f64());

        let reloaded = load_recording(&out, dir.path()).unwrap();
        assert_eq!(reloaded.num_samples(), 1200);
        assert_eq!(reloaded.num_channels(), 2);
        assert_eq!(reloaded.t_start(), Some(3.0));
        assert_eq!(
            reloaded.get_traces(400, 700).unwrap(),
            source.get_traces(400, 700).unwrap()
        );

        saved.reset_times();
        assert_eq!(saved.start_time(), 0.0);
    }

    #[test]
    fn corrupt_chunk_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_binary_fixture(dir.path(), "rec.raw", 300, 1, None);
        let source = load_recording(&dict, dir.path()).unwrap();
        let folder = dir.path().join("rec.zarr");
        let saved =
            save_recording(source.as_ref(), &folder, &WavPackCodec::lossless(), 100).unwrap();

        fs::write(store::chunk_path(&folder, 1), [9u8; 4]).unwrap();
        assert!(saved.get_traces(0, 100).is_ok());
        match saved.get_traces(50, 150) {
            Err(RecordingError::Codec { path, .. }) => assert!(path.ends_with("1.0")),
            other => panic!("unexpected {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn chunk_with_wrong_shape_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_binary_fixture(dir.path(), "rec.raw", 300, 1, None);
        let source = load_recording(&dict, dir.path()).unwrap();
        let folder = dir.path().join("rec.zarr");
        let saved =
            save_recording(source.as_ref(), &folder, &WavPackCodec::lossless(), 100).unwrap();

        let other = WavPackCodec::lossless()
            .encode(&[1, 2, 3, 4], 1, Dtype::Int16)
            .unwrap();
        fs::write(store::chunk_path(&folder, 2), other).unwrap();
        assert!(matches!(
            saved.get_traces(250, 300),
            Err(RecordingError::CorruptChunk { .. })
        ));
    }

    #[test]
    fn missing_store_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ZarrRecording::open(&dir.path().join("nope.zarr")),
            Err(RecordingError::Io { .. })
        ));
    }
}
