//! Contract with the generative model. The model itself lives behind these traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::catalog::VariantSpec;
use crate::params::GenerationParams;
use crate::request::VoicePrompt;

/// A loaded model variant, shared read-only by every request that targets it.
pub type ModelHandle = Arc<dyn SpeechModel>;

/// Input of one model invocation. `texts` holds one entry per logical item;
/// `languages` and `voices` are already expanded to the same length.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationInput {
    pub texts: Vec<String>,
    pub languages: Vec<String>,
    pub voices: Vec<VoicePrompt>,
    pub params: GenerationParams,
    pub seed: Option<u64>,
    /// Generate the whole utterance at once rather than in streaming text mode
    pub non_streaming: bool,
}

impl GenerationInput {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Waveforms returned by one call, in input order, at a common sample rate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub waveforms: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Catalog key this handle was loaded for.
    fn variant(&self) -> &str;

    async fn generate(&self, input: &GenerationInput) -> anyhow::Result<ModelOutput>;

    /// Wait for outstanding device work. Called around timed sections so reported
    /// durations reflect compute, not dispatch.
    async fn synchronize(&self) {}
}

/// Builds a [`ModelHandle`] from a catalog entry. Loading is expensive.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, spec: &VariantSpec) -> anyhow::Result<ModelHandle>;
}
