use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::TtsError;
use video_core::VideoError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    UnknownVariant(String),

    #[error("{0}")]
    GenerationFailed(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Video generation is not enabled")]
    VideoDisabled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownVariant(_) | ApiError::VideoDisabled | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::GenerationFailed(_) | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<TtsError> for ApiError {
    fn from(e: TtsError) -> Self {
        let msg = e.to_string();
        match e {
            TtsError::Validation(msg) => ApiError::InvalidInput(msg),
            TtsError::UnknownVariant { .. } => ApiError::UnknownVariant(msg),
            TtsError::Timeout(_) => ApiError::Timeout(msg),
            TtsError::PartialGenerationFailure { .. }
            | TtsError::EmptyOutput
            | TtsError::Model(_)
            | TtsError::InconsistentSampleRate { .. } => ApiError::GenerationFailed(msg),
            TtsError::Encoding(_) | TtsError::Stream(_) => ApiError::InternalError(msg),
        }
    }
}

impl From<VideoError> for ApiError {
    fn from(e: VideoError) -> Self {
        match e {
            VideoError::MalformedAvatar(_)
            | VideoError::EmptyText
            | VideoError::EmptyEngine
            | VideoError::InvalidQuality(_) => ApiError::InvalidInput(e.to_string()),
            VideoError::Fetch(_) => ApiError::UpstreamUnavailable(e.to_string()),
            VideoError::InvalidBaseUrl(_) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{self}");
        } else {
            tracing::debug!(status = status.as_u16(), "{self}");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
