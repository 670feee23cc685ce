//! Configuration management for Leo
//!
//! Values are layered: built-in defaults, then the TOML file, then
//! environment variables.

pub mod file;

use std::path::Path;

use secrecy::SecretString;

use crate::persona::Persona;
use crate::{Error, Result};

pub use file::{LeoConfigFile, config_file_path, load_config_file};

/// Default REST base URL
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default live websocket URL
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default streaming chat model
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";

/// Default image generation model
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// Default live audio model
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Puck";

/// Default number of recent messages sent with a chat request
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Leo configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key
    pub api_key: Option<SecretString>,

    /// Model identifiers
    pub models: ModelsConfig,

    /// Text chat configuration
    pub chat: ChatConfig,

    /// Live session configuration
    pub live: LiveConfig,

    /// Active persona
    pub persona: Persona,

    /// REST base URL
    pub base_url: String,
}

/// Model identifiers
#[derive(Debug, Clone)]
pub struct ModelsConfig {
    pub chat: String,
    pub image: String,
    pub live: String,
}

/// Text chat configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Number of recent messages sent as history
    pub history_window: usize,

    /// Attach the search tool so replies carry citations
    pub search_grounding: bool,
}

/// Live session configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Prebuilt voice name
    pub voice: String,

    /// Websocket URL (without the key query parameter)
    pub url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            models: ModelsConfig {
                chat: DEFAULT_CHAT_MODEL.to_string(),
                image: DEFAULT_IMAGE_MODEL.to_string(),
                live: DEFAULT_LIVE_MODEL.to_string(),
            },
            chat: ChatConfig {
                history_window: DEFAULT_HISTORY_WINDOW,
                search_grounding: true,
            },
            live: LiveConfig {
                voice: DEFAULT_VOICE.to_string(),
                url: DEFAULT_LIVE_URL.to_string(),
            },
            persona: Persona::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// `path` overrides the standard config file location.
    #[must_use]
    pub fn load(path: Option<&Path>) -> Self {
        let fc = load_config_file(path);
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// Environment values take precedence over file values.
    pub fn from_sources(fc: LeoConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("LEO_API_KEY"))
            .or(fc.api_key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let models = ModelsConfig {
            chat: env("LEO_CHAT_MODEL")
                .or(fc.models.chat)
                .unwrap_or(defaults.models.chat),
            image: env("LEO_IMAGE_MODEL")
                .or(fc.models.image)
                .unwrap_or(defaults.models.image),
            live: env("LEO_LIVE_MODEL")
                .or(fc.models.live)
                .unwrap_or(defaults.models.live),
        };

        let history_window = env("LEO_HISTORY_WINDOW")
            .and_then(|v| match v.parse::<usize>() {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!(value = %v, error = %e, "invalid LEO_HISTORY_WINDOW, ignoring");
                    None
                }
            })
            .or(fc.chat.history_window)
            .unwrap_or(defaults.chat.history_window);

        let search_grounding = env("LEO_SEARCH_GROUNDING")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(fc.chat.search_grounding)
            .unwrap_or(defaults.chat.search_grounding);

        let live = LiveConfig {
            voice: env("LEO_VOICE")
                .or(fc.live.voice)
                .unwrap_or(defaults.live.voice),
            url: env("LEO_LIVE_URL")
                .or(fc.endpoints.live_url)
                .unwrap_or(defaults.live.url),
        };

        let persona = defaults.persona.with_overrides(
            fc.persona.name,
            fc.persona.instruction,
            fc.persona.image_caption,
        );

        let base_url = env("LEO_BASE_URL")
            .or(fc.endpoints.base_url)
            .unwrap_or(defaults.base_url)
            .trim_end_matches('/')
            .to_string();

        Self {
            api_key,
            models,
            chat: ChatConfig {
                history_window,
                search_grounding,
            },
            live,
            persona,
            base_url,
        }
    }

    /// Return the API key or a configuration error
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn require_api_key(&self) -> Result<SecretString> {
        self.api_key.clone().ok_or_else(|| {
            Error::Config(
                "Gemini API key required (set GEMINI_API_KEY or api_key in config.toml)"
                    .to_string(),
            )
        })
    }
}
