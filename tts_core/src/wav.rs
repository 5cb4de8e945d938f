use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};

use crate::assemble::Waveform;
use crate::error::{Result, TtsError};

const I16_MAX_F32: f32 = i16::MAX as f32;

/// Encode a waveform as a 16-bit PCM WAV (RIFF) container.
pub fn encode_wav(waveform: &Waveform) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: waveform.channels.max(1),
        sample_rate: waveform.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    // WAV header (44 bytes) + 2 bytes per sample
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + waveform.samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in &waveform.samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

pub fn encode_wav_base64(waveform: &Waveform) -> Result<String> {
    Ok(general_purpose::STANDARD.encode(encode_wav(waveform)?))
}

/// Decode a WAV container (integer PCM up to 32 bits, or 32-bit float) into
/// normalized f32 samples.
pub fn decode_wav(bytes: &[u8]) -> Result<Waveform> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(Waveform {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

pub fn decode_wav_base64(data: &str) -> Result<Waveform> {
    let bytes = general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| TtsError::Encoding(format!("invalid base64 audio: {e}")))?;
    decode_wav(&bytes)
}
