use std::path::Path;

use serde_json::{json, Map};

use super::{check_range, load_recording, Dtype, Recording, RecordingDict, RecordingError};

pub const DEFAULT_FREQ_MIN: f64 = 300.0;
pub const DEFAULT_MARGIN_MS: f64 = 5.0;

/// Section Q factors of a 4th order Butterworth response.
const BUTTERWORTH_Q: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_6];

/// Second-order section, transposed direct form II.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn highpass(frequency: f64, sample_rate: f64, q: f64) -> Self {
        let omega = 2.0 * std::f64::consts::PI * frequency / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 + cos_omega) / 2.0;
        let b1 = -(1.0 + cos_omega);
        let b2 = (1.0 + cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    fn process(&mut self, samples: &mut [f64]) {
        for sample in samples {
            let input = *sample;
            let output = self.b0 * input + self.z1;
            self.z1 = self.b1 * input - self.a1 * output + self.z2;
            self.z2 = self.b2 * input - self.a2 * output;
            *sample = output;
        }
    }
}

/// Zero-phase highpass view over another recording.
///
/// Traces are filtered lazily per request. Each window is padded with
/// `margin_ms` of neighbouring samples so chunk edges see settled filter
/// state, then the padding is dropped and samples are rounded back to the
/// parent's dtype.
pub struct HighpassFilterRecording {
    parent: Box<dyn Recording>,
    freq_min: f64,
    margin_ms: f64,
    margin: usize,
    sections: Vec<Biquad>,
}

impl HighpassFilterRecording {
    pub const CLASS: &'static str = "HighpassFilterRecording";

    pub fn new(
        parent: Box<dyn Recording>,
        freq_min: f64,
        margin_ms: f64,
    ) -> Result<Self, RecordingError> {
        let fs = parent.sampling_frequency();
        if !(freq_min > 0.0 && freq_min < fs / 2.0) {
            return Err(RecordingError::InvalidKwarg {
                name: "freq_min".into(),
                reason: format!("{} Hz is outside (0, {}) Hz", freq_min, fs / 2.0),
            });
        }
        if !(margin_ms >= 0.0 && margin_ms.is_finite()) {
            return Err(RecordingError::InvalidKwarg {
                name: "margin_ms".into(),
                reason: format!("{} must be a finite non-negative number", margin_ms),
            });
        }
        let margin = (margin_ms * fs / 1000.0).round();
        if margin > parent.num_samples() as f64 {
            return Err(RecordingError::InvalidKwarg {
                name: "margin_ms".into(),
                reason: format!(
                    "{} ms margin is longer than the recording ({} samples)",
                    margin_ms,
                    parent.num_samples()
                ),
            });
        }

        Ok(Self {
            margin: margin as usize,
            sections: BUTTERWORTH_Q
                .iter()
                .map(|&q| Biquad::highpass(freq_min, fs, q))
                .collect(),
            parent,
            freq_min,
            margin_ms,
        })
    }

    pub fn with_defaults(parent: Box<dyn Recording>) -> Result<Self, RecordingError> {
        Self::new(parent, DEFAULT_FREQ_MIN, DEFAULT_MARGIN_MS)
    }

    pub fn from_dict(dict: &RecordingDict, base_folder: &Path) -> Result<Self, RecordingError> {
        let nested: RecordingDict = serde_json::from_value(dict.kwarg("recording")?.clone())
            .map_err(|e| RecordingError::InvalidKwarg {
                name: "recording".into(),
                reason: e.to_string(),
            })?;
        let parent = load_recording(&nested, base_folder)?;
        Self::new(
            parent,
            dict.kwarg_f64_or("freq_min", DEFAULT_FREQ_MIN)?,
            dict.kwarg_f64_or("margin_ms", DEFAULT_MARGIN_MS)?,
        )
    }

    /// Forward-backward pass through every section.
    fn filter_column(&self, column: &mut [f64]) {
        for _ in 0..2 {
            for section in &self.sections {
                let mut section = *section;
                section.process(column);
            }
            column.reverse();
        }
    }
}

impl Recording for HighpassFilterRecording {
    fn name(&self) -> &'static str {
        Self::CLASS
    }

    fn sampling_frequency(&self) -> f64 {
        self.parent.sampling_frequency()
    }

    fn num_channels(&self) -> usize {
        self.parent.num_channels()
    }

    fn num_samples(&self) -> usize {
        self.parent.num_samples()
    }

    fn channel_ids(&self) -> Vec<String> {
        self.parent.channel_ids()
    }

    fn dtype(&self) -> Dtype {
        self.parent.dtype()
    }

    fn t_start(&self) -> Option<f64> {
        self.parent.t_start()
    }

    fn reset_times(&mut self) {
        self.parent.reset_times();
    }

    fn get_traces(&self, start: usize, end: usize) -> Result<Vec<i32>, RecordingError> {
        let num_samples = self.num_samples();
        check_range(start, end, num_samples)?;
        if start == end {
            return Ok(Vec::new());
        }

        let padded_start = start.saturating_sub(self.margin);
        let padded_end = end.saturating_add(self.margin).min(num_samples);
        let raw = self.parent.get_traces(padded_start, padded_end)?;

        let num_channels = self.num_channels();
        let dtype = self.dtype();
        let offset = start - padded_start;
        let len = end - start;
        let mut traces = vec![0i32; len * num_channels];
        let mut column = Vec::with_capacity(padded_end - padded_start);

        for channel in 0..num_channels {
            column.clear();
            column.extend(
                raw.iter()
                    .skip(channel)
                    .step_by(num_channels)
                    .map(|&v| v as f64),
            );
            self.filter_column(&mut column);
            for (i, value) in column[offset..offset + len].iter().enumerate() {
                traces[i * num_channels + channel] = dtype.clamp(value.round() as i64);
            }
        }

        Ok(traces)
    }

    fn to_dict(&self, relative_to: Option<&Path>) -> RecordingDict {
        let nested = self.parent.to_dict(relative_to);
        let relative = nested.relative_paths;
        let mut kwargs = Map::new();
        kwargs.insert("recording".into(), nested.into_value());
        kwargs.insert("freq_min".into(), json!(self.freq_min));
        kwargs.insert("margin_ms".into(), json!(self.margin_ms));
        RecordingDict::new(Self::CLASS, kwargs, relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{testing::write_binary_fixture, BinaryRecording};

    fn dc_recording(dir: &Path, value: i16, num_samples: usize) -> Box<dyn Recording> {
        let bytes: Vec<u8> = (0..num_samples).flat_map(|_| value.to_le_bytes()).collect();
        let path = dir.join("dc.raw");
        std::fs::write(&path, bytes).unwrap();
        Box::new(BinaryRecording::open(path, 30_000.0, 1, Dtype::Int16, 0).unwrap())
    }

    #[test]
    fn removes_dc_offset() {
        let dir = tempfile::tempdir().unwrap();
        let filtered =
            HighpassFilterRecording::new(dc_recording(dir.path(), 1000, 30_000), 300.0, 100.0)
                .unwrap();

        // With a settled margin the constant offset is gone.
        let traces = filtered.get_traces(10_000, 11_000).unwrap();
        assert!(traces.iter().all(|v| v.abs() <= 1), "{:?}", &traces[..10]);
    }

    #[test]
    fn keeps_shape_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_binary_fixture(dir.path(), "rec.raw", 5000, 3, Some(2.0));
        let parent = load_recording(&dict, dir.path()).unwrap();
        let filtered = HighpassFilterRecording::with_defaults(parent).unwrap();

        assert_eq!(filtered.num_samples(), 5000);
        assert_eq!(filtered.num_channels(), 3);
        assert_eq!(filtered.t_start(), Some(2.0));
        assert_eq!(filtered.get_traces(100, 400).unwrap().len(), 900);
        assert!(filtered.get_traces(0, 0).unwrap().is_empty());
    }

    #[test]
    fn windows_agree_away_from_edges() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_binary_fixture(dir.path(), "rec.raw", 9000, 1, None);
        let parent = load_recording(&dict, dir.path()).unwrap();
        let filtered = HighpassFilterRecording::new(parent, 300.0, 50.0).unwrap();

        let whole = filtered.get_traces(3000, 6000).unwrap();
        let part = filtered.get_traces(4000, 5000).unwrap();
        let diff = whole[1000..2000]
            .iter()
            .zip(&part)
            .map(|(a, b)| (a - b).abs())
            .max()
            .unwrap();
        assert!(diff <= 2, "max diff {}", diff);
    }

    #[test]
    fn dict_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dict = write_binary_fixture(dir.path(), "rec.raw", 1000, 2, None);
        let parent = load_recording(&dict, dir.path()).unwrap();
        let filtered = HighpassFilterRecording::new(parent, 400.0, 5.0).unwrap();

        let out = filtered.to_dict(Some(dir.path()));
        assert_eq!(out.class_name(), HighpassFilterRecording::CLASS);
        assert!(out.relative_paths);

        let reloaded = load_recording(&out, dir.path()).unwrap();
        assert_eq!(reloaded.name(), HighpassFilterRecording::CLASS);
        assert_eq!(
            reloaded.get_traces(200, 300).unwrap(),
            filtered.get_traces(200, 300).unwrap()
        );
    }

    #[test]
    fn rejects_unbounded_margins() {
        let dir = tempfile::tempdir().unwrap();
        for margin_ms in [1e30, f64::INFINITY, f64::NAN, -1.0] {
            let parent = dc_recording(dir.path(), 0, 300);
            assert!(
                matches!(
                    HighpassFilterRecording::new(parent, 300.0, margin_ms),
                    Err(RecordingError::InvalidKwarg { ref name, .. }) if name == "margin_ms"
                ),
                "margin {}",
                margin_ms
            );
        }

        // a margin covering the whole recording is still fine
        let parent = dc_recording(dir.path(), 0, 300);
        let filtered = HighpassFilterRecording::new(parent, 300.0, 10.0).unwrap();
        assert_eq!(filtered.get_traces(0, 10).unwrap().len(), 10);
    }

    #[test]
    fn rejects_cutoff_above_nyquist() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dc_recording(dir.path(), 0, 10);
        assert!(matches!(
            HighpassFilterRecording::new(parent, 20_000.0, 5.0),
            Err(RecordingError::InvalidKwarg { .. })
        ));
    }
}
