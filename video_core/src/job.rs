use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VideoError;

pub const DEFAULT_ENGINE: &str = "qwen3tts";
pub const DEFAULT_VOICE: &str = "default";
pub const AUTO_AVATAR: &str = "auto";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }
}

impl FromStr for Quality {
    type Err = VideoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(VideoError::InvalidQuality(other.to_string())),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `record` blocks until the renderer is done, `generate` only enqueues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Record,
    Generate,
}

/// Check an avatar reference: `auto`, or a name/path made of
/// `[A-Za-z0-9._/-]` without any `..` component.
pub fn validate_avatar(avatar: &str) -> Result<(), VideoError> {
    if avatar == AUTO_AVATAR {
        return Ok(());
    }
    let well_formed = !avatar.is_empty()
        && avatar
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'))
        && !avatar.split('/').any(|part| part == "..");
    if well_formed {
        Ok(())
    } else {
        Err(VideoError::MalformedAvatar(avatar.to_string()))
    }
}

/// One render request for the lip-sync service.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoJob {
    pub text: String,
    pub avatar: String,
    pub engine: String,
    pub voice: String,
    pub quality: Quality,
    /// Pre-rendered narration the renderer should use instead of its own TTS
    pub audio_path: Option<String>,
}

impl VideoJob {
    pub fn new(text: impl Into<String>, avatar: impl Into<String>) -> Result<Self, VideoError> {
        let job = Self {
            text: text.into(),
            avatar: avatar.into(),
            engine: DEFAULT_ENGINE.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            quality: Quality::default(),
            audio_path: None,
        };
        job.validate()?;
        Ok(job)
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>, voice: impl Into<String>) -> Self {
        self.engine = engine.into();
        self.voice = voice.into();
        self
    }

    pub fn with_audio(mut self, audio_path: impl Into<String>) -> Self {
        self.audio_path = Some(audio_path.into());
        self
    }

    pub fn validate(&self) -> Result<(), VideoError> {
        if self.text.trim().is_empty() {
            return Err(VideoError::EmptyText);
        }
        if self.engine.trim().is_empty() {
            return Err(VideoError::EmptyEngine);
        }
        validate_avatar(&self.avatar)
    }
}
