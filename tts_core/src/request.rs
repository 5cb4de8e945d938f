//! Client request shape and its normalization into per-item work.
//!
//! Every list-typed field is either broadcast from a scalar or must match the
//! length of `text`. Normalization happens once, up front; nothing downstream
//! branches on scalar-vs-list again.

use serde::{Deserialize, Serialize};

use crate::catalog::{AVAILABLE_SPEAKERS, SUPPORTED_LANGUAGES};
use crate::error::{Result, TtsError};
use crate::params::GenerationParams;
use crate::segment::SplitMode;

/// Maximum characters per text item
pub const MAX_TEXT_LENGTH: usize = 5000;

/// A field that may be sent either as a scalar or as a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn is_list(&self) -> bool {
        matches!(self, OneOrMany::Many(_))
    }

    pub fn first(&self) -> Option<&T> {
        match self {
            OneOrMany::One(v) => Some(v),
            OneOrMany::Many(v) => v.first(),
        }
    }

    fn expand(&self, field: &str, n: usize) -> Result<Vec<T>> {
        match self {
            OneOrMany::One(v) => Ok(vec![v.clone(); n]),
            OneOrMany::Many(v) if v.len() == n => Ok(v.clone()),
            OneOrMany::Many(v) => Err(TtsError::validation(format!(
                "'{field}' has {} item(s) but 'text' has {n}",
                v.len()
            ))),
        }
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(v: T) -> Self {
        OneOrMany::One(v)
    }
}

/// Voice-selection mode, chosen by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceMode {
    CustomVoice,
    VoiceDesign,
    VoiceClone,
}

impl VoiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceMode::CustomVoice => "custom_voice",
            VoiceMode::VoiceDesign => "voice_design",
            VoiceMode::VoiceClone => "voice_clone",
        }
    }

    /// Size tier used when the client does not pick one.
    pub fn default_size(&self) -> &'static str {
        match self {
            VoiceMode::VoiceDesign => "1.7b",
            _ => "0.6b",
        }
    }
}

impl std::str::FromStr for VoiceMode {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "custom_voice" => Ok(VoiceMode::CustomVoice),
            "voice_design" => Ok(VoiceMode::VoiceDesign),
            "voice_clone" => Ok(VoiceMode::VoiceClone),
            other => Err(TtsError::validation(format!(
                "Unknown synthesis mode '{other}'. Expected custom_voice, voice_design or voice_clone"
            ))),
        }
    }
}

/// Request body accepted by every synthesis endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisRequest {
    pub text: OneOrMany<String>,
    #[serde(default = "default_language")]
    pub language: OneOrMany<String>,
    #[serde(default)]
    pub speaker: Option<OneOrMany<String>>,
    /// Style instruction (custom voice) or voice description (voice design)
    #[serde(default, alias = "description")]
    pub instruct: Option<OneOrMany<String>>,
    #[serde(default)]
    pub ref_audio: Option<OneOrMany<String>>,
    #[serde(default)]
    pub ref_text: Option<OneOrMany<String>>,
    #[serde(default)]
    pub x_vector_only_mode: bool,
    #[serde(default)]
    pub split_sentences: SplitMode,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub generation_params: Option<GenerationParams>,
}

fn default_language() -> OneOrMany<String> {
    OneOrMany::One("Auto".to_string())
}

impl SynthesisRequest {
    /// Scalar request with every optional field at its default.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: OneOrMany::One(text.into()),
            language: default_language(),
            speaker: None,
            instruct: None,
            ref_audio: None,
            ref_text: None,
            x_vector_only_mode: false,
            split_sentences: SplitMode::Auto,
            seed: None,
            generation_params: None,
        }
    }

    /// Validate every field and expand list/scalar fields to one item per text.
    pub fn normalize(&self, mode: VoiceMode) -> Result<NormalizedRequest> {
        let texts = match &self.text {
            OneOrMany::One(t) => vec![t.clone()],
            OneOrMany::Many(v) if v.is_empty() => {
                return Err(TtsError::validation("'text' list cannot be empty"))
            }
            OneOrMany::Many(v) => v.clone(),
        };
        let n = texts.len();
        for (i, text) in texts.iter().enumerate() {
            validate_text(text).map_err(|e| match (e, self.text.is_list()) {
                (TtsError::Validation(msg), true) => {
                    TtsError::validation(format!("text[{i}]: {msg}"))
                }
                (e, _) => e,
            })?;
        }

        let languages = self
            .language
            .expand("language", n)?
            .iter()
            .map(|l| canonical_language(l))
            .collect::<Result<Vec<_>>>()?;

        let voices = self.voice_prompts(mode, n)?;

        let params = self.generation_params.unwrap_or_default();
        params.validate()?;

        let items = texts
            .into_iter()
            .zip(languages)
            .zip(voices)
            .map(|((text, language), voice)| SynthesisItem {
                text: text.trim().to_string(),
                language,
                voice,
            })
            .collect();

        Ok(NormalizedRequest {
            mode,
            items,
            batch: self.text.is_list(),
            params,
            seed: self.seed,
            split: self.split_sentences,
        })
    }

    fn voice_prompts(&self, mode: VoiceMode, n: usize) -> Result<Vec<VoicePrompt>> {
        match mode {
            VoiceMode::CustomVoice => {
                let speakers = required(&self.speaker, "speaker", mode)?.expand("speaker", n)?;
                let instructs = match &self.instruct {
                    Some(v) => v.expand("instruct", n)?,
                    None => vec![String::new(); n],
                };
                speakers
                    .iter()
                    .zip(instructs)
                    .map(|(speaker, instruct)| {
                        Ok(VoicePrompt::NamedSpeaker {
                            speaker: canonical_speaker(speaker)?,
                            instruct: instruct.trim().to_string(),
                        })
                    })
                    .collect()
            }
            VoiceMode::VoiceDesign => required(&self.instruct, "instruct", mode)?
                .expand("instruct", n)?
                .into_iter()
                .map(|description| {
                    let description = description.trim().to_string();
                    if description.is_empty() {
                        return Err(TtsError::validation(
                            "voice_design requires a non-empty 'instruct' description",
                        ));
                    }
                    Ok(VoicePrompt::Design { description })
                })
                .collect(),
            VoiceMode::VoiceClone => {
                let audios = required(&self.ref_audio, "ref_audio", mode)?.expand("ref_audio", n)?;
                let texts = match (&self.ref_text, self.x_vector_only_mode) {
                    (Some(v), _) => v.expand("ref_text", n)?.into_iter().map(Some).collect(),
                    (None, true) => vec![None; n],
                    (None, false) => {
                        return Err(TtsError::validation(
                            "voice_clone requires 'ref_text' unless 'x_vector_only_mode' is set",
                        ))
                    }
                };
                audios
                    .into_iter()
                    .zip(texts)
                    .map(|(ref_audio, ref_text)| {
                        if ref_audio.trim().is_empty() {
                            return Err(TtsError::validation("'ref_audio' cannot be empty"));
                        }
                        Ok(VoicePrompt::Clone {
                            ref_audio: ref_audio.trim().to_string(),
                            ref_text,
                            x_vector_only: self.x_vector_only_mode,
                        })
                    })
                    .collect()
            }
        }
    }
}

fn required<'a>(
    field: &'a Option<OneOrMany<String>>,
    name: &str,
    mode: VoiceMode,
) -> Result<&'a OneOrMany<String>> {
    field
        .as_ref()
        .ok_or_else(|| TtsError::validation(format!("{} requires '{name}'", mode.as_str())))
}

fn validate_text(text: &str) -> Result<()> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TtsError::validation("Text cannot be empty"));
    }
    if trimmed.chars().count() > MAX_TEXT_LENGTH {
        return Err(TtsError::validation(format!(
            "Text too long (max {MAX_TEXT_LENGTH} characters)"
        )));
    }
    Ok(())
}

fn canonical_language(lang: &str) -> Result<String> {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| l.eq_ignore_ascii_case(lang.trim()))
        .map(|l| l.to_string())
        .ok_or_else(|| {
            TtsError::validation(format!(
                "Unsupported language '{lang}'. Supported: {}",
                SUPPORTED_LANGUAGES.join(", ")
            ))
        })
}

fn canonical_speaker(speaker: &str) -> Result<String> {
    AVAILABLE_SPEAKERS
        .iter()
        .find(|s| s.eq_ignore_ascii_case(speaker.trim()))
        .map(|s| s.to_string())
        .ok_or_else(|| {
            TtsError::validation(format!(
                "Unknown speaker '{speaker}'. Available: {}",
                AVAILABLE_SPEAKERS.join(", ")
            ))
        })
}

/// How one item's voice is chosen; resolved once at validation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VoicePrompt {
    NamedSpeaker {
        speaker: String,
        instruct: String,
    },
    Design {
        description: String,
    },
    Clone {
        ref_audio: String,
        ref_text: Option<String>,
        x_vector_only: bool,
    },
}

/// One logical input item after broadcasting.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisItem {
    pub text: String,
    pub language: String,
    pub voice: VoicePrompt,
}

#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub mode: VoiceMode,
    pub items: Vec<SynthesisItem>,
    /// `text` arrived as a list
    pub batch: bool,
    pub params: GenerationParams,
    pub seed: Option<u64>,
    pub split: SplitMode,
}

impl NormalizedRequest {
    /// Whether scalar text is split into sentences before generation.
    ///
    /// `auto` splits only in clone mode; the other modes treat text atomically.
    pub fn segmentation_enabled(&self) -> bool {
        if self.batch {
            return false;
        }
        match self.split {
            SplitMode::Never => false,
            SplitMode::Always => true,
            SplitMode::Auto => self.mode == VoiceMode::VoiceClone,
        }
    }
}
