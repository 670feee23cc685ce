//! Per-connection session state and event handling

use tokio::sync::mpsc;

use crate::audio::{
    AudioSink, OUTPUT_SAMPLE_RATE, PlaybackScheduler, SourceId, StreamResampler, decode_pcm,
    duration_secs, encode_pcm, mime_sample_rate,
};
use crate::service::{LiveEvent, LiveSender};
use crate::state::AppState;

/// Why a session loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller asked to stop
    Shutdown,
    /// The server closed the session
    Server(Option<String>),
    /// The event channel ended without a close event
    ChannelClosed,
}

/// Everything owned by one open connection
pub(super) struct LiveSession {
    pub sender: Box<dyn LiveSender>,
    pub events: mpsc::Receiver<LiveEvent>,
    pub frames: mpsc::Receiver<Vec<f32>>,
    pub capturing: bool,
    pub sink: Box<dyn AudioSink>,
    pub ended: mpsc::UnboundedReceiver<SourceId>,
    pub scheduler: PlaybackScheduler,
    pub open: bool,
    pub state: AppState,
}

impl LiveSession {
    /// Apply one vendor event; returns a close reason when the session is over
    pub fn handle_event(&mut self, event: LiveEvent) -> Option<CloseReason> {
        match event {
            LiveEvent::Open => {
                tracing::info!("live session open");
                self.open = true;
                self.state.set_live(true);
            }
            LiveEvent::Audio(payload) => self.play(&payload.data, &payload.mime_type),
            LiveEvent::Interrupted => self.interrupt(),
            LiveEvent::TurnComplete => {
                tracing::debug!(active = self.scheduler.active_count(), "turn complete");
            }
            LiveEvent::Error(e) => {
                tracing::error!(error = %e, "live session error");
            }
            LiveEvent::Closed(reason) => {
                tracing::info!(reason = ?reason, "live session closed by server");
                return Some(CloseReason::Server(reason));
            }
        }
        None
    }

    /// Decode an inbound chunk and queue it after everything already scheduled
    fn play(&mut self, data: &str, mime_type: &str) {
        let samples = match decode_pcm(data) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable audio");
                return;
            }
        };
        if samples.is_empty() {
            return;
        }

        let rate = mime_sample_rate(mime_type).unwrap_or(OUTPUT_SAMPLE_RATE);
        let samples = if rate == OUTPUT_SAMPLE_RATE {
            samples
        } else {
            match StreamResampler::new(rate, OUTPUT_SAMPLE_RATE)
                .and_then(|mut r| r.convert_all(&samples))
            {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, rate, "dropping audio at unsupported rate");
                    return;
                }
            }
        };

        let duration = duration_secs(samples.len(), OUTPUT_SAMPLE_RATE);
        let scheduled = self.scheduler.schedule(self.sink.now(), duration);

        if let Err(e) = self.sink.schedule(scheduled.id, samples, scheduled.start) {
            tracing::warn!(error = %e, "failed to queue audio");
            self.scheduler.finish(scheduled.id);
            return;
        }

        self.state.set_speaking(true);
    }

    /// Stop and forget every scheduled buffer and reset the clock
    pub fn interrupt(&mut self) {
        for id in self.scheduler.interrupt() {
            self.sink.stop(id);
        }
        self.state.set_speaking(false);
    }

    /// A buffer finished playing
    pub fn handle_ended(&mut self, id: SourceId) {
        if self.scheduler.finish(id) && !self.scheduler.is_playing() {
            self.state.set_speaking(false);
        }
    }

    /// Encode and send a captured frame once the session is open
    pub async fn forward_frame(&mut self, frame: &[f32]) {
        if !self.open {
            tracing::trace!("dropping frame captured before open");
            return;
        }
        let payload = encode_pcm(frame);
        if let Err(e) = self.sender.send_audio(&payload).await {
            tracing::error!(error = %e, "failed to send audio frame");
        }
    }

    /// Stop playback, close the output and the socket
    pub async fn teardown(mut self) {
        self.interrupt();
        self.sink.close();
        if let Err(e) = self.sender.close().await {
            tracing::warn!(error = %e, "live socket close failed");
        }
        self.state.update_flags(|f| {
            f.live = false;
            f.speaking = false;
        });
    }
}
