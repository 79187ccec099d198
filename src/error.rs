use std::path::PathBuf;

use crate::recording::RecordingError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to read job descriptor {}: {reason}", path.display())]
    Discovery { path: PathBuf, reason: String },
    #[error("could not load recording {recording_name} from dict, make sure the mapping is correct")]
    Load {
        recording_name: String,
        #[source]
        source: RecordingError,
    },
    #[error("could not preprocess recording {recording_name}")]
    Preprocess {
        recording_name: String,
        #[source]
        source: RecordingError,
    },
    #[error("failed to persist {}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("job worker panicked: {0}")]
    Worker(String),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config(message.into())
    }

    pub fn persist(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        PipelineError::Persist {
            path: path.into(),
            source: source.into(),
        }
    }
}

/// `err` followed by each of its sources, separated by `: `.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
