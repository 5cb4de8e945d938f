use serde::{Deserialize, Serialize};

use crate::error::{Result, TtsError};

pub const DEFAULT_MAX_NEW_TOKENS: u32 = 2048;
pub const DEFAULT_TEMPERATURE: f32 = 0.9;
pub const DEFAULT_TOP_K: u32 = 50;
pub const DEFAULT_TOP_P: f32 = 1.0;
pub const DEFAULT_REPETITION_PENALTY: f32 = 1.05;

/// Sampling knobs forwarded to every model call of a request.
///
/// Out-of-range values are rejected by [`GenerationParams::validate`], never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub do_sample: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_k: DEFAULT_TOP_K,
            top_p: DEFAULT_TOP_P,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
            do_sample: true,
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> Result<()> {
        check_range("max_new_tokens", self.max_new_tokens as f64, 1.0, 4096.0)?;
        check_range("temperature", self.temperature as f64, 0.0, 2.0)?;
        check_range("top_k", self.top_k as f64, 1.0, 100.0)?;
        check_range("top_p", self.top_p as f64, 0.0, 1.0)?;
        check_range("repetition_penalty", self.repetition_penalty as f64, 1.0, 2.0)?;
        Ok(())
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    // NaN fails both comparisons, so test for containment rather than exclusion
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(TtsError::validation(format!(
            "{name} must be between {min} and {max}, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(GenerationParams::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_is_rejected_not_clamped() {
        let params = GenerationParams {
            temperature: 2.5,
            ..Default::default()
        };
        let err = params.validate().unwrap_err();
        assert!(matches!(err, TtsError::Validation(ref msg) if msg.contains("temperature")));
        assert_eq!(params.temperature, 2.5);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let params = GenerationParams {
            max_new_tokens: 4096,
            temperature: 0.0,
            top_k: 100,
            top_p: 0.0,
            repetition_penalty: 2.0,
            do_sample: false,
        };
        assert!(params.validate().is_ok());

        let params = GenerationParams {
            max_new_tokens: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = GenerationParams {
            repetition_penalty: 0.99,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_nan_is_rejected() {
        let params = GenerationParams {
            top_p: f32::NAN,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: GenerationParams = serde_json::from_str(r#"{"top_k": 10}"#).unwrap();
        assert_eq!(params.top_k, 10);
        assert_eq!(params.max_new_tokens, DEFAULT_MAX_NEW_TOKENS);
        assert!(params.do_sample);
    }
}
