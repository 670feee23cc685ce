//! Audio pipeline
//!
//! Handles microphone capture, the PCM wire codec, gapless playback
//! scheduling and speaker output. Capture runs at 16kHz and playback at
//! 24kHz; only sample buffers cross between the two.

pub mod codec;
mod capture;
mod playback;
mod resample;
mod scheduler;

pub use capture::{CpalMicrophone, FRAME_SIZE, Microphone};
pub use codec::{
    AudioPayload, INPUT_MIME_TYPE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, decode_pcm,
    duration_secs, encode_pcm, mime_sample_rate,
};
pub use playback::{AudioSink, CpalSink, CpalSpeaker, OutputHandle, Speaker};
pub use resample::StreamResampler;
pub use scheduler::{PlaybackScheduler, ScheduledSource, SourceId};
