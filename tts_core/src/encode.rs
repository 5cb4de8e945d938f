use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::SynthesisResult;
use crate::error::{Result, TtsError};
use crate::request::NormalizedRequest;
use crate::wav::{encode_wav, encode_wav_base64};

/// Whether the client asked for one artifact or a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Single,
    Batch,
}

impl DeliveryMode {
    pub fn for_request(request: &NormalizedRequest) -> Self {
        if request.batch {
            DeliveryMode::Batch
        } else {
            DeliveryMode::Single
        }
    }
}

/// JSON body used whenever the response is not a single WAV file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEnvelope {
    pub success: bool,
    pub message: String,
    pub sample_rate: u32,
    pub audio_count: usize,
    /// Base64 WAV files, in input order
    pub audio_data: Vec<String>,
    /// Seconds, rounded to milliseconds
    pub generation_time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodedResponse {
    Audio { wav: Vec<u8>, elapsed: Duration },
    Envelope(AudioEnvelope),
}

impl EncodedResponse {
    pub fn content_type(&self) -> &'static str {
        match self {
            EncodedResponse::Audio { .. } => "audio/wav",
            EncodedResponse::Envelope(_) => "application/json",
        }
    }
}

/// Binary WAV for a single request that produced exactly one waveform, a JSON
/// envelope for everything else.
pub fn encode(result: &SynthesisResult, mode: DeliveryMode) -> Result<EncodedResponse> {
    if result.waveforms.is_empty() {
        return Err(TtsError::EmptyOutput);
    }

    if mode == DeliveryMode::Single && result.waveforms.len() == 1 {
        return Ok(EncodedResponse::Audio {
            wav: encode_wav(&result.waveforms[0])?,
            elapsed: result.elapsed,
        });
    }

    let audio_data = result
        .waveforms
        .iter()
        .map(encode_wav_base64)
        .collect::<Result<Vec<_>>>()?;

    Ok(EncodedResponse::Envelope(AudioEnvelope {
        success: true,
        message: format!("Generated {} audio(s)", audio_data.len()),
        sample_rate: result.sample_rate,
        audio_count: audio_data.len(),
        audio_data,
        generation_time: format_secs(result.elapsed),
    }))
}

/// Seconds with three decimals, as used in headers and envelopes.
pub fn format_secs(d: Duration) -> f64 {
    (d.as_secs_f64() * 1000.0).round() / 1000.0
}
