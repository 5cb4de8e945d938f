use thiserror::Error;

/// Misuse of the delegate. Upstream failures are not errors here; they come back
/// as [`RenderOutcome::Failed`](crate::RenderOutcome::Failed).
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("Malformed avatar reference '{0}'")]
    MalformedAvatar(String),

    #[error("Video text must not be empty")]
    EmptyText,

    #[error("TTS engine tag must not be empty")]
    EmptyEngine,

    #[error("Invalid quality '{0}'. Expected low, medium or high")]
    InvalidQuality(String),

    #[error("Invalid video service URL '{0}'")]
    InvalidBaseUrl(String),

    #[error("Failed to fetch video: {0}")]
    Fetch(String),
}
