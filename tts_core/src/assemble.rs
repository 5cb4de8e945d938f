use crate::error::{Result, TtsError};

/// A decoded waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Waveform {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        frames * 1000 / self.sample_rate as u64
    }
}

/// Output of one model call for one sentence, tagged with the sentence index.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub index: usize,
    pub waveform: Waveform,
}

/// Concatenate chunks in sentence order into one waveform.
///
/// A single chunk is returned as-is. Chunks disagreeing on sample rate or channel
/// count indicate a broken model contract and fail with `InconsistentSampleRate`.
pub fn assemble(mut chunks: Vec<AudioChunk>) -> Result<Waveform> {
    if chunks.len() <= 1 {
        return chunks
            .pop()
            .map(|c| c.waveform)
            .ok_or(TtsError::EmptyOutput);
    }

    chunks.sort_by_key(|c| c.index);
    let sample_rate = chunks[0].waveform.sample_rate;
    let channels = chunks[0].waveform.channels;

    for chunk in &chunks[1..] {
        if chunk.waveform.sample_rate != sample_rate || chunk.waveform.channels != channels {
            return Err(TtsError::InconsistentSampleRate {
                expected: sample_rate,
                found: chunk.waveform.sample_rate,
                index: chunk.index,
            });
        }
    }

    let total: usize = chunks.iter().map(|c| c.waveform.samples.len()).sum();
    let mut samples = Vec::with_capacity(total);
    for chunk in chunks {
        samples.extend(chunk.waveform.samples);
    }

    tracing::debug!(samples = total, sample_rate, "assembled chunks");
    Ok(Waveform {
        samples,
        sample_rate,
        channels,
    })
}
