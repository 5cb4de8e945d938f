//! Drives the model calls for one logical request.
//!
//! Segmented scalar text is generated one sentence at a time, strictly in order,
//! and assembled into a single waveform. Anything else gets one call per item.
//! Calls are never issued in parallel: the accelerator behind a handle runs one
//! generation at a time anyway.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::assemble::{assemble, AudioChunk, Waveform};
use crate::error::{Result, TtsError};
use crate::model::{GenerationInput, ModelHandle};
use crate::registry::ModelRegistry;
use crate::request::{NormalizedRequest, SynthesisItem};
use crate::segment::segment;

/// Final waveforms of one request, one per logical input item.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub waveforms: Vec<Waveform>,
    pub sample_rate: u32,
    /// Wall clock from the first call's start to the last call's completion
    pub elapsed: Duration,
}

impl SynthesisResult {
    pub fn total_samples(&self) -> usize {
        self.waveforms.iter().map(|w| w.samples.len()).sum()
    }

    /// Join every waveform into one, in item order.
    pub fn merged(self) -> Result<Waveform> {
        assemble(
            self.waveforms
                .into_iter()
                .enumerate()
                .map(|(index, waveform)| AudioChunk { index, waveform })
                .collect(),
        )
    }
}

#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<ModelRegistry>,
    inference_timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            inference_timeout: None,
        }
    }

    /// Bound each model call. An overrun fails the request; the call itself keeps
    /// running on the backend.
    pub fn with_inference_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub async fn synthesize(&self, variant: &str, request: &NormalizedRequest) -> Result<SynthesisResult> {
        let model = self.registry.resolve(variant).await?;

        model.synchronize().await;
        let started = Instant::now();

        let waveforms = if request.segmentation_enabled() {
            let item = &request.items[0];
            let sentences = segment(&item.text, request.split);
            let chunks = self.generate_sentences(&model, request, item, &sentences).await?;
            vec![assemble(chunks)?]
        } else {
            self.generate_items(&model, request).await?
        };

        model.synchronize().await;
        let elapsed = started.elapsed();

        let sample_rate = common_sample_rate(&waveforms)?;
        info!(
            variant = %variant,
            mode = request.mode.as_str(),
            items = waveforms.len(),
            elapsed_s = elapsed.as_secs_f64(),
            "Synthesis complete"
        );

        Ok(SynthesisResult {
            waveforms,
            sample_rate,
            elapsed,
        })
    }

    /// One call per sentence, in order. The first failing sentence fails the
    /// whole request; finished sentences are not salvaged.
    pub async fn generate_sentences(
        &self,
        model: &ModelHandle,
        request: &NormalizedRequest,
        item: &SynthesisItem,
        sentences: &[String],
    ) -> Result<Vec<AudioChunk>> {
        let total = sentences.len();
        let mut chunks = Vec::with_capacity(total);
        for (index, sentence) in sentences.iter().enumerate() {
            debug!(index, total, sentence = %preview(sentence), "Generating sentence");
            let waveform = self
                .generate_one(model, request, item, sentence, true)
                .await
                .map_err(|e| sentence_failure(e, index, total))?;
            debug!(index, samples = waveform.samples.len(), "Sentence done");
            chunks.push(AudioChunk { index, waveform });
        }
        Ok(chunks)
    }

    async fn generate_items(&self, model: &ModelHandle, request: &NormalizedRequest) -> Result<Vec<Waveform>> {
        let mut waveforms = Vec::with_capacity(request.items.len());
        for (index, item) in request.items.iter().enumerate() {
            let waveform = self
                .generate_one(model, request, item, &item.text, true)
                .await
                .map_err(|e| match e {
                    TtsError::EmptyOutput if request.batch => {
                        TtsError::Model(format!("item {index} produced no audio"))
                    }
                    e => e,
                })?;
            waveforms.push(waveform);
        }
        Ok(waveforms)
    }

    /// A single model invocation for `text` with `item`'s language and voice.
    pub async fn generate_one(
        &self,
        model: &ModelHandle,
        request: &NormalizedRequest,
        item: &SynthesisItem,
        text: &str,
        non_streaming: bool,
    ) -> Result<Waveform> {
        let input = GenerationInput {
            texts: vec![text.to_string()],
            languages: vec![item.language.clone()],
            voices: vec![item.voice.clone()],
            params: request.params,
            seed: request.seed,
            non_streaming,
        };

        let call = model.generate(&input);
        let output = match self.inference_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                warn!(variant = model.variant(), "Inference timed out after {:?}", limit);
                TtsError::Timeout(limit)
            })?,
            None => call.await,
        }
        .map_err(|e| TtsError::Model(format!("{e:#}")))?;

        let samples = output
            .waveforms
            .into_iter()
            .next()
            .ok_or(TtsError::EmptyOutput)?;
        Ok(Waveform::mono(samples, output.sample_rate))
    }
}

pub(crate) fn sentence_failure(e: TtsError, index: usize, total: usize) -> TtsError {
    if total <= 1 {
        return e;
    }
    warn!(index, total, "Sentence generation failed: {e}");
    TtsError::PartialGenerationFailure {
        index,
        total,
        reason: e.to_string(),
    }
}

fn common_sample_rate(waveforms: &[Waveform]) -> Result<u32> {
    let first = waveforms.first().ok_or(TtsError::EmptyOutput)?.sample_rate;
    for (index, w) in waveforms.iter().enumerate().skip(1) {
        if w.sample_rate != first {
            return Err(TtsError::InconsistentSampleRate {
                expected: first,
                found: w.sample_rate,
                index,
            });
        }
    }
    Ok(first)
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
