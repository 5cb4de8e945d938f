//! Sentence segmentation for long-form input.
//!
//! Long passages are generated sentence by sentence so the model does not
//! truncate its output. A boundary is a run of terminal punctuation followed by
//! whitespace; the punctuation run itself is consumed by the split.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+\s+").expect("sentence boundary pattern is valid"));

/// Sentence-split override carried by a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    #[default]
    Auto,
    Always,
    Never,
}

impl SplitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitMode::Auto => "auto",
            SplitMode::Always => "always",
            SplitMode::Never => "never",
        }
    }
}

impl std::str::FromStr for SplitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(SplitMode::Auto),
            "always" | "true" => Ok(SplitMode::Always),
            "never" | "false" => Ok(SplitMode::Never),
            other => Err(format!(
                "Invalid split mode '{other}'. Expected auto, always or never"
            )),
        }
    }
}

// Accepts `null`, booleans (`true` = always, `false` = never) and the three names.
impl<'de> Deserialize<'de> for SplitMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Name(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(SplitMode::Auto),
            Some(Raw::Flag(true)) => Ok(SplitMode::Always),
            Some(Raw::Flag(false)) => Ok(SplitMode::Never),
            Some(Raw::Name(name)) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Split `text` into trimmed, non-empty sentences.
///
/// Never drops the input: when no boundary yields a sentence the trimmed text
/// comes back as the only element. `Never` skips splitting altogether.
pub fn segment(text: &str, mode: SplitMode) -> Vec<String> {
    let trimmed = text.trim();
    if mode == SplitMode::Never {
        return vec![trimmed.to_string()];
    }

    let sentences: Vec<String> = SENTENCE_BOUNDARY
        .split(trimmed)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if sentences.is_empty() {
        return vec![trimmed.to_string()];
    }

    tracing::debug!(count = sentences.len(), "split text into sentences");
    sentences
}
