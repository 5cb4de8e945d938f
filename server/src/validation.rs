use tts_core::VoiceMode;

use crate::error::ApiError;

/// Parse the `{mode}` path segment of `/tts/{mode}`.
pub fn parse_mode(mode: &str) -> Result<VoiceMode, ApiError> {
    mode.parse::<VoiceMode>()
        .map_err(|_| ApiError::NotFound(format!("Unknown TTS mode '{mode}'. Expected custom_voice, voice_design or voice_clone")))
}

/// Check the shape of a `model_size` query value (`0.6b`, `1.7b`, ...).
///
/// Only malformed values are rejected here. A well-formed size with no matching
/// variant is left for the registry to report as unknown.
pub fn validate_model_size(size: &str) -> Result<&str, ApiError> {
    let size = size.trim();
    let well_formed = size
        .strip_suffix(['b', 'B'])
        .map(|digits| {
            !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
                && digits.chars().next().is_some_and(|c| c.is_ascii_digit())
        })
        .unwrap_or(false);
    if well_formed {
        Ok(size)
    } else {
        Err(ApiError::InvalidInput(format!(
            "Invalid model_size '{size}'. Expected a size tier such as 0.6b or 1.7b"
        )))
    }
}
