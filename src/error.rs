//! Error types for Leo

use thiserror::Error;

/// Result type alias for Leo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Leo
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone unavailable or access denied
    #[error("microphone error: {0}")]
    Microphone(String),

    /// Chat completion error
    #[error("chat error: {0}")]
    Chat(String),

    /// Image generation error
    #[error("image error: {0}")]
    Image(String),

    /// Live session error
    #[error("live session error: {0}")]
    Live(String),

    /// PCM payload could not be decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(String),
}
