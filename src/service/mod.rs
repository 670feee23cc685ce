//! Service adapter for the hosted model
//!
//! Each modality is a trait so the chat orchestrator and live controller can
//! run against the Gemini implementation or a test double. There is no retry,
//! backoff or caching here; failures propagate to the caller.

mod gemini;
pub mod live;
pub mod sse;
mod wire;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Result;
use crate::chat::{HistoryTurn, Source};

pub use gemini::{GeminiClient, decode_data_url};
pub use live::{
    GeminiLiveConnector, LiveConnection, LiveConnector, LiveEvent, LiveSender, LiveSetup,
};

/// One streamed piece of an assistant reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatChunk {
    /// Text fragment, possibly empty
    pub text: String,
    /// Citations delivered with this fragment
    pub sources: Vec<Source>,
}

impl ChatChunk {
    /// A chunk carrying only text
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
        }
    }
}

/// Lazily produced reply fragments, in arrival order
pub type ChatStream = BoxStream<'static, Result<ChatChunk>>;

/// Streaming text chat
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Start a streamed reply to `prompt` given recent `history`
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started
    async fn stream_chat(&self, prompt: &str, history: &[HistoryTurn]) -> Result<ChatStream>;
}

/// On-demand image generation
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Generate an image for `prompt`
    ///
    /// Returns `Ok(None)` when the model produced no image.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    async fn generate_image(&self, prompt: &str) -> Result<Option<String>>;
}
