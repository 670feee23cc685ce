//! Image-intent classification

use std::sync::LazyLock;

use regex::Regex;

static IMAGE_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)\b(generate|visuali[sz]e|create|show me)\b").unwrap()
});

/// Whether `text` asks for a picture rather than a text reply
#[must_use]
pub fn is_image_request(text: &str) -> bool {
    IMAGE_INTENT.is_match(text)
}
