//! PCM wire codec for the live endpoint
//!
//! Audio travels as base64-encoded 16-bit little-endian mono PCM.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sample rate of captured audio sent upstream (16kHz for speech)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio received from the live endpoint
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// MIME type announced for upstream audio
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// An encoded audio frame as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    /// Base64 PCM bytes
    pub data: String,
    pub mime_type: String,
}

/// Encode f32 samples in [-1.0, 1.0] as a 16kHz upstream payload
#[must_use]
pub fn encode_pcm(samples: &[f32]) -> AudioPayload {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let s = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&s.to_le_bytes());
    }

    AudioPayload {
        data: STANDARD.encode(&bytes),
        mime_type: INPUT_MIME_TYPE.to_string(),
    }
}

/// Decode base64 16-bit PCM into f32 samples
///
/// # Errors
///
/// Returns error if the data is not valid base64 or has an odd byte length
pub fn decode_pcm(data: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Codec(format!("invalid base64: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(Error::Codec(format!(
            "odd PCM byte length: {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect())
}

/// Parse the `rate=` parameter of a PCM MIME type (e.g. `audio/pcm;rate=24000`)
#[must_use]
pub fn mime_sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|r| r.trim().parse().ok())
}

/// Duration in seconds of `samples` mono samples at `sample_rate`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn duration_secs(samples: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples as f64 / f64::from(sample_rate)
}
