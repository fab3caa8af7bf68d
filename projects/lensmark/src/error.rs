use std::path::Path;
use thiserror::Error;

/// Failures a single pipeline invocation can surface to its caller.
///
/// Transcoding failures are not part of this enum: they never fail a request
/// and are reported through [`crate::pipeline::transcode::TranscodeOutcome`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("cannot write {path}: {reason}")]
    Encode { path: String, reason: String },

    #[error("detector failed to load: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn decode(path: &Path, reason: impl std::fmt::Display) -> Self {
        PipelineError::Decode {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn encode(path: &Path, reason: impl std::fmt::Display) -> Self {
        PipelineError::Encode {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, PipelineError::Decode { .. })
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
