//! Recent-history windowing for chat requests

use serde::Serialize;

use super::{Message, Role};

/// A role-tagged turn sent to the chat endpoint as context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

/// Take the last `window` messages as history turns
///
/// Messages without text (image replies, empty placeholders) are skipped
/// after windowing, so the window counts conversation entries, not turns.
#[must_use]
pub fn recent_history(messages: &[Message], window: usize) -> Vec<HistoryTurn> {
    let start = messages.len().saturating_sub(window);
    messages[start..]
        .iter()
        .filter(|m| !m.text.trim().is_empty())
        .map(|m| HistoryTurn {
            role: m.role,
            text: m.text.clone(),
        })
        .collect()
}
