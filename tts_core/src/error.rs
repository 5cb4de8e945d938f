use std::time::Duration;

use thiserror::Error;

use crate::stream::SessionError;

pub type Result<T> = std::result::Result<T, TtsError>;

/// Failures surfaced by the synthesis pipeline.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unknown model variant '{key}'. Available: {}", available.join(", "))]
    UnknownVariant { key: String, available: Vec<String> },

    #[error("Generation failed for sentence {index} of {total}: {reason}")]
    PartialGenerationFailure {
        index: usize,
        total: usize,
        reason: String,
    },

    #[error("Chunk {index} has sample rate {found}, expected {expected}")]
    InconsistentSampleRate {
        expected: u32,
        found: u32,
        index: usize,
    },

    #[error("No audio generated")]
    EmptyOutput,

    #[error("Model error: {0}")]
    Model(String),

    #[error("Inference timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Audio encoding error: {0}")]
    Encoding(String),

    #[error("Stream error: {0}")]
    Stream(#[from] SessionError),
}

impl TtsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TtsError::Validation(msg.into())
    }
}

impl From<hound::Error> for TtsError {
    fn from(e: hound::Error) -> Self {
        TtsError::Encoding(e.to_string())
    }
}
