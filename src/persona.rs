//! Companion persona
//!
//! The persona supplies the system instruction shared by text chat and live
//! sessions, plus the caption posted alongside generated images.

use serde::{Deserialize, Serialize};

/// Default display name
pub const DEFAULT_NAME: &str = "Leo";

/// Default caption posted with a generated image
pub const DEFAULT_IMAGE_CAPTION: &str = "Here's what I imagined for you!";

const DEFAULT_INSTRUCTION: &str = "You are Leo, a warm and curious companion. \
Speak naturally and keep replies short enough to be read aloud. \
Be encouraging, ask a follow-up question when it helps, and admit when you are unsure.";

/// Identity of the companion
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Display name
    pub name: String,

    /// System instruction sent with every chat request and live setup
    pub instruction: String,

    /// Fixed caption for image replies
    pub image_caption: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            image_caption: DEFAULT_IMAGE_CAPTION.to_string(),
        }
    }
}

impl Persona {
    /// Apply non-empty overrides on top of this persona
    #[must_use]
    pub fn with_overrides(
        mut self,
        name: Option<String>,
        instruction: Option<String>,
        image_caption: Option<String>,
    ) -> Self {
        if let Some(name) = name.filter(|s| !s.trim().is_empty()) {
            self.name = name;
        }
        if let Some(instruction) = instruction.filter(|s| !s.trim().is_empty()) {
            self.instruction = instruction;
        }
        if let Some(caption) = image_caption.filter(|s| !s.trim().is_empty()) {
            self.image_caption = caption;
        }
        self
    }
}
