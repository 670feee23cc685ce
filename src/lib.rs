//! Leo - a chat companion for Gemini
//!
//! This library provides the core functionality for Leo:
//! - Streaming text chat with recent history and search citations
//! - On-demand image generation triggered by image-intent phrases
//! - Live voice sessions with gapless playback and interruption handling
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Front end (CLI)                     │
//! │        renders StateEvents, reads user input        │
//! └──────────────┬──────────────────────▲───────────────┘
//!                │                      │
//! ┌──────────────▼────────────┐  ┌──────┴──────────────┐
//! │ ChatOrchestrator │ Live   │─▶│      AppState       │
//! │                  │ Control│  │ messages + flags    │
//! └──────────────┬────────────┘  └─────────────────────┘
//!                │
//! ┌──────────────▼──────────────────────────────────────┐
//! │               Service adapter (Gemini)               │
//! │   chat stream  │  image  │  live websocket  │ codec  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod chat;
pub mod config;
pub mod error;
pub mod live;
pub mod persona;
pub mod service;
pub mod state;

pub use chat::{ChatOrchestrator, Message, Rejected, Role, Source, SubmitOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use live::{CloseReason, LiveController, LiveState, StartOutcome};
pub use persona::Persona;
pub use service::{
    ChatChunk, ChatService, ChatStream, GeminiClient, GeminiLiveConnector, ImageService,
    LiveConnector, LiveEvent, LiveSetup,
};
pub use state::{AppState, Emotion, Flags, StateEvent};
