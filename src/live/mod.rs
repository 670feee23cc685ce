//! Live voice session controller
//!
//! Lifecycle: `Idle → Connecting → Open → Closed`. While open, captured
//! microphone frames are encoded and streamed upstream, and inbound audio is
//! scheduled for gapless playback.
//!
//! Vendor events, playback-ended notifications, captured frames and the
//! caller's shutdown signal are all consumed by one `select!` loop, so an
//! interruption is applied before any later frame is scheduled.

mod session;

use std::future::Future;
use std::sync::Arc;

use session::LiveSession;

use crate::audio::{Microphone, OutputHandle, PlaybackScheduler, Speaker};
use crate::service::{LiveConnection, LiveConnector, LiveEvent, LiveSetup};
use crate::state::AppState;

pub use session::CloseReason;

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Result of asking to go live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Connection established; waiting for the server to open the session
    Connecting,
    /// A session is already running
    AlreadyActive,
    /// Microphone could not be acquired (e.g. permission denied)
    MicrophoneUnavailable,
    /// No usable output device
    OutputUnavailable,
    /// The vendor connection could not be opened
    ConnectFailed,
}

/// Orchestrates capture, the vendor connection and playback
pub struct LiveController {
    state: AppState,
    connector: Arc<dyn LiveConnector>,
    setup: LiveSetup,
    microphone: Box<dyn Microphone>,
    speaker: Box<dyn Speaker>,
    live_state: LiveState,
    session: Option<LiveSession>,
}

impl LiveController {
    #[must_use]
    pub fn new(
        state: AppState,
        connector: Arc<dyn LiveConnector>,
        setup: LiveSetup,
        microphone: Box<dyn Microphone>,
        speaker: Box<dyn Speaker>,
    ) -> Self {
        Self {
            state,
            connector,
            setup,
            microphone,
            speaker,
            live_state: LiveState::Idle,
            session: None,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn live_state(&self) -> LiveState {
        self.live_state
    }

    /// Acquire the microphone and open the vendor connection
    ///
    /// Failures are logged and reported through the outcome; they never
    /// escape as errors and leave the controller idle.
    #[allow(clippy::future_not_send)]
    pub async fn start(&mut self) -> StartOutcome {
        if matches!(self.live_state, LiveState::Connecting | LiveState::Open) {
            return StartOutcome::AlreadyActive;
        }

        self.live_state = LiveState::Connecting;

        let frames = match self.microphone.start() {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(error = %e, "microphone unavailable");
                self.live_state = LiveState::Idle;
                return StartOutcome::MicrophoneUnavailable;
            }
        };

        let OutputHandle { mut sink, ended } = match self.speaker.open() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "audio output unavailable");
                self.microphone.stop();
                self.live_state = LiveState::Idle;
                return StartOutcome::OutputUnavailable;
            }
        };

        let LiveConnection { sender, events } = match self.connector.connect(&self.setup).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "live connection failed");
                sink.close();
                self.microphone.stop();
                self.live_state = LiveState::Idle;
                return StartOutcome::ConnectFailed;
            }
        };

        self.session = Some(LiveSession {
            sender,
            events,
            frames,
            capturing: true,
            sink,
            ended,
            scheduler: PlaybackScheduler::new(),
            open: false,
            state: self.state.clone(),
        });

        tracing::info!("live session connecting");
        StartOutcome::Connecting
    }

    /// Run the session until the server closes it or `shutdown` resolves
    ///
    /// Always tears down explicitly: capture stops, scheduled audio is
    /// dropped, the output closes and the socket is closed.
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> CloseReason {
        let Some(mut session) = self.session.take() else {
            return CloseReason::ChannelClosed;
        };

        tokio::pin!(shutdown);

        let reason = loop {
            tokio::select! {
                biased;

                () = &mut shutdown => break CloseReason::Shutdown,

                event = session.events.recv() => {
                    let Some(event) = event else {
                        break CloseReason::ChannelClosed;
                    };
                    let opening = matches!(event, LiveEvent::Open);
                    if let Some(reason) = session.handle_event(event) {
                        break reason;
                    }
                    if opening {
                        self.live_state = LiveState::Open;
                    }
                }

                Some(id) = session.ended.recv() => session.handle_ended(id),

                frame = session.frames.recv(), if session.capturing => match frame {
                    Some(frame) => session.forward_frame(&frame).await,
                    None => {
                        tracing::warn!("microphone stream ended");
                        session.capturing = false;
                    }
                },
            }
        };

        tracing::info!(reason = ?reason, "live session ending");

        self.microphone.stop();
        session.teardown().await;
        self.live_state = LiveState::Closed;

        reason
    }
}
