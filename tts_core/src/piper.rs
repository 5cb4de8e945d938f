//! Local ONNX voices through `piper-rs`.
//!
//! A catalog entry's `path` points at the voice's `.onnx.json` config. Piper only
//! knows fixed voices, so only named-speaker prompts are accepted.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};

use crate::catalog::{ModelFamily, VariantSpec};
use crate::model::{GenerationInput, ModelHandle, ModelLoader, ModelOutput, SpeechModel};
use crate::request::VoicePrompt;

/// Read `audio.sample_rate` from a piper voice config.
pub fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
    let text = fs::read_to_string(cfg_path.as_ref())
        .with_context(|| format!("Failed to read config file: {}", cfg_path.as_ref().display()))?;
    let json: serde_json::Value = serde_json::from_str(&text).context("Config file is not valid JSON")?;

    let sample_rate = json
        .get("audio")
        .and_then(|a| a.get("sample_rate"))
        .and_then(|sr| sr.as_u64())
        .ok_or_else(|| anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;
    Ok(sample_rate as u32)
}

#[derive(Debug, Clone, Default)]
pub struct PiperLoader;

#[async_trait]
impl ModelLoader for PiperLoader {
    async fn load(&self, spec: &VariantSpec) -> anyhow::Result<ModelHandle> {
        if spec.family != ModelFamily::CustomVoice {
            bail!("piper voices only serve the custom_voice family, '{}' is {}", spec.key, spec.family.as_str());
        }
        let key = spec.key.clone();
        let cfg_path = spec.path.clone();
        // ONNX session setup is blocking work
        let model = tokio::task::spawn_blocking(move || -> anyhow::Result<PiperModel> {
            let sample_rate = read_sample_rate(&cfg_path)?;
            let voice = piper_rs::from_config_path(Path::new(&cfg_path))
                .map_err(|e| anyhow!("piper load error: {e}"))?;
            let synth = PiperSpeechSynthesizer::new(voice)?;
            Ok(PiperModel {
                variant: key,
                synth: Arc::new(synth),
                sample_rate,
            })
        })
        .await
        .context("piper load task panicked")??;
        Ok(Arc::new(model))
    }
}

pub struct PiperModel {
    variant: String,
    synth: Arc<PiperSpeechSynthesizer>,
    sample_rate: u32,
}

impl PiperModel {
    fn synthesize(synth: &PiperSpeechSynthesizer, text: &str) -> anyhow::Result<Vec<f32>> {
        let parts: PiperSpeechStreamParallel = synth
            .synthesize_parallel(text.to_string(), None)
            .map_err(|e| anyhow!("piper synth error: {e}"))?;

        let mut samples = Vec::new();
        for part in parts {
            samples.extend(part.map_err(|e| anyhow!("chunk error: {e}"))?.into_vec());
        }
        Ok(samples)
    }
}

#[async_trait]
impl SpeechModel for PiperModel {
    fn variant(&self) -> &str {
        &self.variant
    }

    async fn generate(&self, input: &GenerationInput) -> anyhow::Result<ModelOutput> {
        if let Some(voice) = input
            .voices
            .iter()
            .find(|v| !matches!(v, VoicePrompt::NamedSpeaker { .. }))
        {
            bail!("piper backend cannot render {voice:?}");
        }

        let synth = self.synth.clone();
        let texts = input.texts.clone();
        let waveforms = tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|text| Self::synthesize(&synth, text))
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await
        .context("piper synthesis task panicked")??;

        Ok(ModelOutput {
            waveforms,
            sample_rate: self.sample_rate,
        })
    }
}
