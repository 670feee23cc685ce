//! Chat submission flow
//!
//! A submit either produces an image reply (when the text asks for one and
//! generation succeeds) or falls back to a streamed text reply. Exactly one
//! user message and one assistant message are appended per accepted submit.

use std::sync::Arc;

use futures::StreamExt;

use super::history::recent_history;
use super::intent::is_image_request;
use super::message::Message;
use crate::service::{ChatService, ImageService};
use crate::state::{AppState, Emotion};

/// Why a submit was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// Input was empty or whitespace
    Blank,
    /// A response is already in flight
    Busy,
}

/// Result of a submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing was appended
    Rejected(Rejected),
    /// An image reply was posted
    Image { message_id: String },
    /// A streamed text reply was posted
    Text {
        message_id: String,
        /// `false` if the stream failed; partial text is kept
        completed: bool,
    },
}

/// Drives a submit through the service adapter into application state
pub struct ChatOrchestrator {
    state: AppState,
    chat: Arc<dyn ChatService>,
    images: Arc<dyn ImageService>,
    history_window: usize,
    image_caption: String,
}

impl ChatOrchestrator {
    #[must_use]
    pub fn new(
        state: AppState,
        chat: Arc<dyn ChatService>,
        images: Arc<dyn ImageService>,
        history_window: usize,
        image_caption: impl Into<String>,
    ) -> Self {
        Self {
            state,
            chat,
            images,
            history_window,
            image_caption: image_caption.into(),
        }
    }

    /// The state this orchestrator writes to
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Submit user input
    ///
    /// Failures never escape: an image failure falls through to text, and a
    /// text failure sets the emotion to concerned.
    pub async fn submit(&self, input: &str) -> SubmitOutcome {
        let text = input.trim();
        if text.is_empty() {
            return SubmitOutcome::Rejected(Rejected::Blank);
        }
        if !self.state.try_begin_thinking() {
            tracing::debug!("submit ignored, response in flight");
            return SubmitOutcome::Rejected(Rejected::Busy);
        }

        let prior = self.state.messages();
        self.state.append(Message::user(text));

        let outcome = match self.try_image(text).await {
            Some(message_id) => {
                self.state.set_emotion(Emotion::Happy);
                SubmitOutcome::Image { message_id }
            }
            None => self.stream_text(text, &prior).await,
        };

        self.state.update_flags(|f| {
            f.thinking = false;
            f.speaking = false;
        });

        outcome
    }

    /// Attempt the image path; `None` means fall back to text
    async fn try_image(&self, text: &str) -> Option<String> {
        if !is_image_request(text) {
            return None;
        }

        tracing::info!("image intent detected");

        match self.images.generate_image(text).await {
            Ok(Some(url)) => {
                let message = Message::assistant(self.image_caption.clone()).with_image(url);
                Some(self.state.append(message))
            }
            Ok(None) => {
                tracing::warn!("image generation returned no image, falling back to text");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "image generation failed, falling back to text");
                None
            }
        }
    }

    async fn stream_text(&self, text: &str, prior: &[Message]) -> SubmitOutcome {
        let history = recent_history(prior, self.history_window);
        let message_id = self.state.append(Message::assistant(""));

        let mut stream = match self.chat.stream_chat(text, &history).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "chat stream failed to start");
                self.state.set_emotion(Emotion::Concerned);
                return SubmitOutcome::Text {
                    message_id,
                    completed: false,
                };
            }
        };

        let mut fragments = 0usize;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if !chunk.text.is_empty() {
                        if fragments == 0 {
                            self.state.set_speaking(true);
                        }
                        fragments += 1;
                        self.state.append_text(&message_id, &chunk.text);
                    }
                    self.state.merge_sources(&message_id, chunk.sources);
                }
                Err(e) => {
                    tracing::error!(error = %e, fragments, "chat stream failed");
                    self.state.set_emotion(Emotion::Concerned);
                    return SubmitOutcome::Text {
                        message_id,
                        completed: false,
                    };
                }
            }
        }

        tracing::debug!(fragments, "chat stream complete");
        self.state.set_emotion(Emotion::Happy);
        SubmitOutcome::Text {
            message_id,
            completed: true,
        }
    }
}
