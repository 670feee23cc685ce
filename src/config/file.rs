//! TOML configuration file loading
//!
//! Supports `~/.config/leo/config.toml` as a persistent config source.
//! All fields are optional. The file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LeoConfigFile {
    /// Gemini API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifiers
    #[serde(default)]
    pub models: ModelsFileConfig,

    /// Text chat configuration
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Live voice session configuration
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Persona overrides
    #[serde(default)]
    pub persona: PersonaFileConfig,

    /// Endpoint overrides
    #[serde(default)]
    pub endpoints: EndpointsFileConfig,
}

/// Model identifiers
#[derive(Debug, Default, Deserialize)]
pub struct ModelsFileConfig {
    /// Streaming chat model (e.g. "gemini-2.5-flash")
    pub chat: Option<String>,

    /// Image generation model
    pub image: Option<String>,

    /// Live audio model
    pub live: Option<String>,
}

/// Text chat configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Number of recent messages sent as history
    pub history_window: Option<usize>,

    /// Attach the search tool so replies carry citations
    pub search_grounding: Option<bool>,
}

/// Live session configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// Prebuilt voice name (e.g. "Puck")
    pub voice: Option<String>,
}

/// Persona overrides
#[derive(Debug, Default, Deserialize)]
pub struct PersonaFileConfig {
    pub name: Option<String>,
    pub instruction: Option<String>,
    pub image_caption: Option<String>,
}

/// Endpoint overrides (useful for proxies)
#[derive(Debug, Default, Deserialize)]
pub struct EndpointsFileConfig {
    /// REST base URL
    pub base_url: Option<String>,

    /// Live websocket URL (without the key query parameter)
    pub live_url: Option<String>,
}

/// Load the TOML config file from `path`, or the standard path when `None`
///
/// Returns `LeoConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> LeoConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return LeoConfigFile::default();
    };

    if !path.exists() {
        return LeoConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LeoConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LeoConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/leo/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("leo").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_file(Some(&dir.path().join("nope.toml")));
        assert!(cfg.api_key.is_none());
        assert!(cfg.models.chat.is_none());
    }

    #[test]
    fn test_partial_file_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[models]\nchat = \"gemini-test\"\n\n[live]\nvoice = \"Kore\"\n\n[chat]\nhistory_window = 4"
        )
        .unwrap();

        let cfg = load_config_file(Some(file.path()));
        assert_eq!(cfg.models.chat.as_deref(), Some("gemini-test"));
        assert_eq!(cfg.live.voice.as_deref(), Some("Kore"));
        assert_eq!(cfg.chat.history_window, Some(4));
        assert!(cfg.models.image.is_none());
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "models = [not valid").unwrap();

        let cfg = load_config_file(Some(file.path()));
        assert!(cfg.models.chat.is_none());
    }
}
