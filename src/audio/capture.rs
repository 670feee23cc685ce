//! Audio capture from microphone

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::codec::INPUT_SAMPLE_RATE;
use super::resample::StreamResampler;
use crate::{Error, Result};

/// Samples per captured frame sent upstream
pub const FRAME_SIZE: usize = 4096;

/// Frames buffered between the capture thread and the session loop
const FRAME_QUEUE: usize = 32;

/// A source of 16kHz mono frames
///
/// `start` acquires the device; an access failure (including a denied
/// permission) is reported as [`Error::Microphone`].
pub trait Microphone {
    /// Begin capturing and return the frame receiver
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>>;

    /// Stop capturing and release the device
    fn stop(&mut self);
}

/// Captures audio from the default input device
#[derive(Default)]
pub struct CpalMicrophone {
    stream: Option<Stream>,
}

impl CpalMicrophone {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a mono 16kHz config, else the device default
    fn select_config(device: &cpal::Device) -> Result<StreamConfig> {
        let exact = device
            .supported_input_configs()
            .map_err(|e| Error::Microphone(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
            });

        if let Some(c) = exact {
            return Ok(c.with_sample_rate(SampleRate(INPUT_SAMPLE_RATE)).config());
        }

        device
            .default_input_config()
            .map(|c| c.config())
            .map_err(|e| Error::Microphone(e.to_string()))
    }
}

impl Microphone for CpalMicrophone {
    fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        if self.stream.is_some() {
            return Err(Error::Microphone("capture already running".to_string()));
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Microphone("no input device available".to_string()))?;

        let config = Self::select_config(&device)?;
        let channels = usize::from(config.channels.max(1));
        let device_rate = config.sample_rate.0;

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            device_rate,
            channels,
            target_rate = INPUT_SAMPLE_RATE,
            "audio capture initialized"
        );

        let mut resampler = StreamResampler::new(device_rate, INPUT_SAMPLE_RATE)?;
        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let mut frame: Vec<f32> = Vec::with_capacity(FRAME_SIZE);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    #[allow(clippy::cast_precision_loss)]
                    let mono: Vec<f32> = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks(channels)
                            .map(|c| c.iter().sum::<f32>() / c.len() as f32)
                            .collect()
                    };

                    let samples = match resampler.push(&mono) {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::error!(error = %e, "capture resample failed");
                            return;
                        }
                    };

                    for sample in samples {
                        frame.push(sample);
                        if frame.len() == FRAME_SIZE {
                            let full = std::mem::replace(&mut frame, Vec::with_capacity(FRAME_SIZE));
                            if tx.try_send(full).is_err() {
                                tracing::trace!("capture frame dropped");
                            }
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Microphone(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::Microphone(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
