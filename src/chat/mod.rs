//! Text and image chat
//!
//! Owns the message model, image-intent classification, history windowing
//! and the submit flow that ties them to the service adapter.

mod history;
mod intent;
mod message;
mod orchestrator;

pub use history::{HistoryTurn, recent_history};
pub use intent::is_image_request;
pub use message::{Message, Role, Source};
pub use orchestrator::{ChatOrchestrator, Rejected, SubmitOutcome};
