//! Streaming sample-rate conversion using rubato

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Converts a mono stream between two rates, buffering partial chunks
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    from_rate: usize,
    to_rate: usize,
}

impl StreamResampler {
    /// Create a resampler; a pass-through when the rates match
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be initialized
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    from_rate as usize,
                    to_rate as usize,
                    CHUNK_SIZE,
                    SUB_CHUNKS,
                    1,
                )
                .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?,
            )
        };

        Ok(Self {
            inner,
            pending: Vec::new(),
            from_rate: from_rate as usize,
            to_rate: to_rate as usize,
        })
    }

    /// Feed samples and return whatever full chunks could be converted
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let result = resampler
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            output.extend_from_slice(&result[0]);
        }

        Ok(output)
    }

    /// Convert a complete buffer in one shot
    ///
    /// Any streaming state is discarded first. The filter delay is trimmed
    /// from the front and the tail is flushed with silence, so the result is
    /// exactly `round(len * to / from)` samples aligned with the input.
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn convert_all(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        resampler.reset();
        self.pending.clear();
        let delay = resampler.output_delay();
        let expected = (samples.len() * self.to_rate + self.from_rate / 2) / self.from_rate;

        let mut output = self.push(samples)?;
        while output.len() < delay + expected {
            let needed = match self.inner.as_ref() {
                Some(r) => r.input_frames_next() - self.pending.len(),
                None => break,
            };
            output.extend(self.push(&vec![0.0; needed])?);
        }

        output.drain(..delay.min(output.len()));
        output.truncate(expected);
        Ok(output)
    }
}
