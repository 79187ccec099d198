//! Chunked on-disk array store for compressed recordings.
//!
//! Layout of `<name>.zarr/`:
//!
//! - `.zattrs` holds [`RootAttributes`]: sampling frequency, channel ids, time
//!   base and annotations (including `compression_ratio`)
//! - `traces_seg0/.zarray` holds [`ArrayMetadata`]: shape, chunk shape, dtype and
//!   codec configuration
//! - `traces_seg0/<i>.0` is encoded chunk `i` covering all channels

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    codec::{CodecConfig, CodecError, WavPackCodec},
    fs_ops,
    recording::{Recording, RecordingError, ZarrRecording},
};

pub const STORE_EXTENSION: &str = "zarr";
pub const ROOT_ATTRS: &str = ".zattrs";
pub const ARRAY_METADATA: &str = ".zarray";
pub const TRACES_ARRAY: &str = "traces_seg0";
pub const COMPRESSION_RATIO: &str = "compression_ratio";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot store an empty recording ({num_samples} samples, {num_channels} channels)")]
    EmptyRecording {
        num_samples: usize,
        num_channels: usize,
    },
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialise store metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl StoreError {
    fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub zarr_format: u8,
    /// `[num_samples, num_channels]`
    pub shape: [usize; 2],
    /// `[chunk_frames, num_channels]`
    pub chunks: [usize; 2],
    pub dtype: String,
    pub compressor: CodecConfig,
    pub fill_value: i64,
    pub order: String,
    pub filters: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootAttributes {
    pub sampling_frequency: f64,
    pub num_segments: usize,
    pub channel_ids: Vec<String>,
    #[serde(default)]
    pub t_starts: Vec<Option<f64>>,
    #[serde(default)]
    pub annotations: Map<String, Value>,
}

pub fn chunk_path(folder: &Path, index: usize) -> PathBuf {
    folder.join(TRACES_ARRAY).join(format!("{}.0", index))
}

/// Compression ratio of the written store: raw sample bytes over encoded bytes.
pub fn compression_ratio(raw_bytes: usize, encoded_bytes: usize) -> f64 {
    if encoded_bytes == 0 {
        return 1.0;
    }
    raw_bytes as f64 / encoded_bytes as f64
}

/// Encode `recording` into a store at `folder` and reopen it.
///
/// Chunks of `chunk_frames` frames are encoded in parallel on the rayon pool.
/// The store is assembled in a staging directory next to `folder` and moved
/// into place only once complete, replacing any previous store.
pub fn save_recording(
    recording: &dyn Recording,
    folder: &Path,
    codec: &WavPackCodec,
    chunk_frames: usize,
) -> Result<ZarrRecording, StoreError> {
    let num_samples = recording.num_samples();
    let num_channels = recording.num_channels();
    if num_samples == 0 || num_channels == 0 {
        return Err(StoreError::EmptyRecording {
            num_samples,
            num_channels,
        });
    }

    if let Some(parent) = folder.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
    }

    let staging = fs_ops::staging_path(folder);
    let result = write_store(recording, &staging, codec, chunk_frames.clamp(1, num_samples))
        .and_then(|()| fs_ops::replace_dir(&staging, folder).map_err(StoreError::io(folder)));
    if result.is_err() && staging.exists() {
        let _ = fs::remove_dir_all(&staging);
    }
    result?;

    Ok(ZarrRecording::open(folder)?)
}

fn write_store(
    recording: &dyn Recording,
    folder: &Path,
    codec: &WavPackCodec,
    chunk_frames: usize,
) -> Result<(), StoreError> {
    let num_samples = recording.num_samples();
    let num_channels = recording.num_channels();
    let dtype = recording.dtype();

    let traces_dir = folder.join(TRACES_ARRAY);
    fs::create_dir_all(&traces_dir).map_err(StoreError::io(&traces_dir))?;

    let num_chunks = num_samples.div_ceil(chunk_frames);
    let encoded_bytes = (0..num_chunks)
        .into_par_iter()
        .map(|index| -> Result<usize, StoreError> {
            let start = index * chunk_frames;
            let end = (start + chunk_frames).min(num_samples);
            let traces = recording.get_traces(start, end)?;
            let bytes = codec.encode(&traces, num_channels, dtype)?;
            let path = chunk_path(folder, index);
            fs::write(&path, &bytes).map_err(StoreError::io(&path))?;
            Ok(bytes.len())
        })
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .sum::<usize>();

    let raw_bytes = num_samples * num_channels * dtype.itemsize();
    let ratio = compression_ratio(raw_bytes, encoded_bytes);
    debug!(
        "encoded {} chunks: {} -> {} bytes (ratio {:.3})",
        num_chunks, raw_bytes, encoded_bytes, ratio
    );

    let array = ArrayMetadata {
        zarr_format: 2,
        shape: [num_samples, num_channels],
        chunks: [chunk_frames, num_channels],
        dtype: dtype.typestr().to_string(),
        compressor: codec.config(),
        fill_value: 0,
        order: "C".to_string(),
        filters: None,
    };
    let array_path = traces_dir.join(ARRAY_METADATA);
    fs::write(&array_path, serde_json::to_vec_pretty(&array)?)
        .map_err(StoreError::io(&array_path))?;

    let mut annotations = Map::new();
    annotations.insert(COMPRESSION_RATIO.to_string(), json!(ratio));
    let attrs = RootAttributes {
        sampling_frequency: recording.sampling_frequency(),
        num_segments: 1,
        channel_ids: recording.channel_ids(),
        t_starts: vec![recording.t_start()],
        annotations,
    };
    let attrs_path = folder.join(ROOT_ATTRS);
    fs::write(&attrs_path, serde_json::to_vec_pretty(&attrs)?)
        .map_err(StoreError::io(&attrs_path))?;

    Ok(())
}
