//! Scheduled audio playback to speakers
//!
//! Buffers are queued against an output clock that counts rendered frames.
//! The device callback mixes every buffer whose interval covers the current
//! frame and reports buffers that have fully played.

use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::codec::OUTPUT_SAMPLE_RATE;
use super::resample::StreamResampler;
use super::scheduler::SourceId;
use crate::{Error, Result};

/// An open output with a clock and per-buffer scheduling
pub trait AudioSink {
    /// Current output clock in seconds
    fn now(&self) -> f64;

    /// Queue 24kHz mono `samples` to begin at `start` seconds on the output clock
    ///
    /// # Errors
    ///
    /// Returns error if the buffer cannot be queued
    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start: f64) -> Result<()>;

    /// Stop a buffer immediately; no ended event is reported for it
    fn stop(&mut self, id: SourceId);

    /// Stop everything and release the device
    fn close(&mut self);
}

/// An opened output: the sink plus its ended-buffer notifications
pub struct OutputHandle {
    pub sink: Box<dyn AudioSink>,
    pub ended: mpsc::UnboundedReceiver<SourceId>,
}

/// Something that can open an output for one session
pub trait Speaker {
    /// Open the output device
    ///
    /// # Errors
    ///
    /// Returns error if no usable output device exists
    fn open(&mut self) -> Result<OutputHandle>;
}

struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Default)]
struct Mixer {
    clock: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    /// Add a voice; a start the clock has already passed plays from its first sample now
    fn queue(&mut self, id: SourceId, start_frame: u64, samples: Vec<f32>) {
        self.voices.push(Voice {
            id,
            start_frame: start_frame.max(self.clock),
            samples,
        });
    }

    /// Render `frames` mono samples starting at the current clock
    fn render(&mut self, out: &mut [f32], ended: &mpsc::UnboundedSender<SourceId>) {
        out.fill(0.0);
        let base = self.clock;

        for voice in &self.voices {
            let end = voice.end_frame();
            for (i, slot) in out.iter_mut().enumerate() {
                let frame = base + i as u64;
                if frame >= voice.start_frame && frame < end {
                    #[allow(clippy::cast_possible_truncation)]
                    let idx = (frame - voice.start_frame) as usize;
                    *slot += voice.samples[idx];
                }
            }
        }

        self.clock += out.len() as u64;

        let clock = self.clock;
        self.voices.retain(|v| {
            let done = v.end_frame() <= clock;
            if done {
                let _ = ended.send(v.id);
            }
            !done
        });
    }
}

/// Opens the default output device via cpal
#[derive(Debug, Default)]
pub struct CpalSpeaker;

impl CpalSpeaker {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn select_config(device: &cpal::Device) -> Result<StreamConfig> {
        let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
        };

        let exact = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                // Fallback: try stereo
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| supports(c, 2))
            });

        if let Some(c) = exact {
            return Ok(c.with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE)).config());
        }

        device
            .default_output_config()
            .map(|c| c.config())
            .map_err(|e| Error::Audio(e.to_string()))
    }
}

impl Speaker for CpalSpeaker {
    fn open(&mut self) -> Result<OutputHandle> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let config = Self::select_config(&device)?;
        let channels = usize::from(config.channels.max(1));
        let device_rate = config.sample_rate.0;

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            device_rate,
            channels,
            "audio playback initialized"
        );

        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();

        let render_mixer = Arc::clone(&mixer);
        let mut mono: Vec<f32> = Vec::new();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    mono.resize(frames, 0.0);

                    render_mixer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .render(&mut mono, &ended_tx);

                    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let sink = CpalSink {
            stream: Some(stream),
            mixer,
            device_rate,
        };

        Ok(OutputHandle {
            sink: Box::new(sink),
            ended: ended_rx,
        })
    }
}

/// A running cpal output stream
pub struct CpalSink {
    stream: Option<Stream>,
    mixer: Arc<Mutex<Mixer>>,
    device_rate: u32,
}

impl AudioSink for CpalSink {
    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> f64 {
        let clock = self
            .mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clock;
        clock as f64 / f64::from(self.device_rate)
    }

    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start: f64) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Audio("playback closed".to_string()));
        }

        let samples = if self.device_rate == OUTPUT_SAMPLE_RATE {
            samples
        } else {
            StreamResampler::new(OUTPUT_SAMPLE_RATE, self.device_rate)?.convert_all(&samples)?
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_frame = (start.max(0.0) * f64::from(self.device_rate)).round() as u64;

        self.mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue(id, start_frame, samples);
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        self.mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .voices
            .retain(|v| v.id != id);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.mixer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .voices
                .clear();
            tracing::debug!("audio playback closed");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixer_plays_voice_at_start_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::default();
        mixer.voices.push(Voice {
            id: SourceId(7),
            start_frame: 2,
            samples: vec![0.5, 0.25],
        });

        let mut out = vec![1.0; 4];
        mixer.render(&mut out, &tx);

        assert_eq!(out, [0.0, 0.0, 0.5, 0.25]);
        assert_eq!(mixer.clock, 4);
        assert_eq!(rx.try_recv().unwrap(), SourceId(7));
        assert!(mixer.voices.is_empty());
    }

    #[test]
    fn test_late_voice_plays_from_first_sample() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::default();

        // Clock moves past the requested start before the voice is queued
        let mut out = vec![0.0; 4];
        mixer.render(&mut out, &tx);
        mixer.queue(SourceId(3), 1, vec![0.5, 0.25, 0.125]);

        mixer.render(&mut out, &tx);
        assert_eq!(out, [0.5, 0.25, 0.125, 0.0]);
    }

    #[test]
    fn test_mixer_reports_end_only_once_finished() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::default();
        mixer.voices.push(Voice {
            id: SourceId(1),
            start_frame: 0,
            samples: vec![0.1; 6],
        });

        let mut out = vec![0.0; 4];
        mixer.render(&mut out, &tx);
        assert!(rx.try_recv().is_err());

        mixer.render(&mut out, &tx);
        assert_eq!(rx.try_recv().unwrap(), SourceId(1));
        assert_eq!(&out[..2], &[0.1, 0.1]);
        assert_eq!(&out[2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_mixer_sums_overlapping_voices() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::default();
        for id in 0..2 {
            mixer.voices.push(Voice {
                id: SourceId(id),
                start_frame: 0,
                samples: vec![0.25; 2],
            });
        }

        let mut out = vec![0.0; 2];
        mixer.render(&mut out, &tx);
        assert_eq!(out, [0.5, 0.5]);
    }
}
