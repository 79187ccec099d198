pub mod discovery;
pub mod executor;
pub mod format;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::recording::RecordingDict;

pub use executor::run;

/// A unit of work: one recording to compress, plus whatever the upstream
/// stage attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub session_name: String,
    pub recording_name: String,
    pub recording_dict: RecordingDict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_times: Option<bool>,
    /// Fields passed through untouched to the rewritten descriptor.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobDescriptor {
    pub fn skip_times(&self) -> bool {
        self.skip_times.unwrap_or(false)
    }

    /// Copy of this descriptor pointing at a different recording.
    pub fn with_recording_dict(&self, recording_dict: RecordingDict) -> Self {
        Self {
            recording_dict,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn descriptor_value() -> Value {
        json!({
            "session_name": "ecephys_001_2024-01-01",
            "recording_name": "experiment1_Record Node 101#Neuropix-PXI-100.ProbeA_recording1",
            "recording_dict": {
                "class": "spikeinterface.core.binaryrecordingextractor.BinaryRecordingExtractor",
                "module": "spikeinterface",
                "kwargs": {"file_paths": ["rec.raw"], "num_channels": 4},
                "relative_paths": true
            },
            "skip_times": true,
            "debug": false,
            "job_index": 3
        })
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let job: JobDescriptor = serde_json::from_value(descriptor_value()).unwrap();
        assert!(job.skip_times());
        assert_eq!(job.extra.len(), 2);
        assert_eq!(serde_json::to_value(&job).unwrap(), descriptor_value());
    }

    #[test]
    fn skip_times_defaults_to_false() {
        let mut value = descriptor_value();
        value.as_object_mut().unwrap().remove("skip_times");
        let job: JobDescriptor = serde_json::from_value(value).unwrap();
        assert!(!job.skip_times());
        assert!(serde_json::to_value(&job).unwrap().get("skip_times").is_none());
    }

    #[test]
    fn missing_recording_dict_is_rejected() {
        let mut value = descriptor_value();
        value.as_object_mut().unwrap().remove("recording_dict");
        assert!(serde_json::from_value::<JobDescriptor>(value).is_err());
    }

    #[test]
    fn replacing_the_recording_keeps_the_rest() {
        let job: JobDescriptor = serde_json::from_value(descriptor_value()).unwrap();
        let dict = RecordingDict::new("ZarrRecordingExtractor", Map::new(), true);
        let rewritten = job.with_recording_dict(dict.clone());
        assert_eq!(rewritten.recording_dict, dict);
        assert_eq!(rewritten.recording_name, job.recording_name);
        assert_eq!(rewritten.extra, job.extra);
    }
}
