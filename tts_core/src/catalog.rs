use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::request::VoiceMode;

/// Named speakers understood by the custom-voice family.
pub const AVAILABLE_SPEAKERS: &[&str] = &[
    "Vivian", "Serena", "Uncle_Fu", "Dylan", "Eric", "Ryan", "Aiden", "Ono_Anna", "Sohee",
];

pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "Auto",
    "Chinese",
    "English",
    "Japanese",
    "Korean",
    "German",
    "French",
    "Russian",
    "Portuguese",
    "Spanish",
    "Italian",
];

pub const MODEL_SIZES: &[&str] = &["0.6b", "1.7b"];

/// Model family; decides which voice prompt a variant accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    CustomVoice,
    VoiceDesign,
    Base,
}

impl ModelFamily {
    pub fn for_mode(mode: VoiceMode) -> Self {
        match mode {
            VoiceMode::CustomVoice => ModelFamily::CustomVoice,
            VoiceMode::VoiceDesign => ModelFamily::VoiceDesign,
            VoiceMode::VoiceClone => ModelFamily::Base,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::CustomVoice => "custom_voice",
            ModelFamily::VoiceDesign => "voice_design",
            ModelFamily::Base => "base",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Remote,
    Piper,
}

/// One catalog entry: where a variant's weights live and how to run them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    #[serde(skip_deserializing)]
    pub key: String,
    pub path: String,
    pub family: ModelFamily,
    #[serde(default)]
    pub backend: Backend,
}

/// The configured set of variants, keyed by variant name.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    variants: BTreeMap<String, VariantSpec>,
}

impl ModelCatalog {
    pub fn new(variants: impl IntoIterator<Item = VariantSpec>) -> Self {
        Self {
            variants: variants.into_iter().map(|v| (v.key.clone(), v)).collect(),
        }
    }

    /// Qwen3-TTS 12Hz checkpoints under `models_dir`, plus the unsized aliases.
    pub fn builtin(models_dir: &str) -> Self {
        let dir = models_dir.trim_end_matches('/');
        let entry = |key: &str, checkpoint: &str, family| VariantSpec {
            key: key.to_string(),
            path: format!("{dir}/Qwen3-TTS-12Hz-{checkpoint}"),
            family,
            backend: Backend::Remote,
        };
        Self::new([
            entry("custom_voice_1.7b", "1.7B-CustomVoice", ModelFamily::CustomVoice),
            entry("voice_design_1.7b", "1.7B-VoiceDesign", ModelFamily::VoiceDesign),
            entry("base_1.7b", "1.7B-Base", ModelFamily::Base),
            entry("custom_voice_0.6b", "0.6B-CustomVoice", ModelFamily::CustomVoice),
            entry("base_0.6b", "0.6B-Base", ModelFamily::Base),
            entry("custom_voice", "1.7B-CustomVoice", ModelFamily::CustomVoice),
            entry("voice_design", "1.7B-VoiceDesign", ModelFamily::VoiceDesign),
            entry("base", "1.7B-Base", ModelFamily::Base),
        ])
    }

    /// Load from a JSON object of `key -> { path, family, backend }`.
    pub fn from_file<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(p.as_ref())
            .with_context(|| format!("Failed to load {}", p.as_ref().display()))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let raw: BTreeMap<String, VariantSpec> =
            serde_json::from_str(text).context("model catalog is not a valid JSON object")?;
        if raw.is_empty() {
            anyhow::bail!("model catalog is empty");
        }
        Ok(Self::new(raw.into_iter().map(|(key, mut spec)| {
            spec.key = key;
            spec
        })))
    }

    pub fn get(&self, key: &str) -> Option<&VariantSpec> {
        self.variants.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.variants.contains_key(key)
    }

    /// Sorted variant keys.
    pub fn keys(&self) -> Vec<String> {
        self.variants.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// Variant key for a mode and size tier, e.g. `voice_clone` + `0.6b` -> `base_0.6b`.
///
/// The key is not checked against a catalog; an unknown size produces a key the
/// registry will reject.
pub fn variant_key(mode: VoiceMode, model_size: &str) -> String {
    format!("{}_{}", ModelFamily::for_mode(mode).as_str(), model_size.trim())
}
