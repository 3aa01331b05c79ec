use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::content::MAX_UTTERANCE_CHARS;
use crate::error::{AppError, Result};
use crate::extraction::ExtractionSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub claude_api_key: Option<String>,

    /// WebDriver endpoint used for sandboxed rendering, e.g. `http://localhost:4444`.
    pub webdriver_url: Option<String>,

    #[serde(default)]
    pub extraction: ExtractionSettings,

    #[serde(default)]
    pub speech: SpeechSettings,

    #[serde(default)]
    pub ai: AiFeatures,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechSettings {
    #[serde(default = "default_language")]
    pub default_language: String,

    #[serde(default = "default_max_utterance_chars")]
    pub max_utterance_chars: usize,

    /// Words per minute handed to the synthesizer.
    #[serde(default = "default_rate")]
    pub rate: u32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            max_utterance_chars: default_max_utterance_chars(),
            rate: default_rate(),
        }
    }
}

/// Feature flags gating the post-extraction AI chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiFeatures {
    #[serde(default)]
    pub cleaning: bool,

    #[serde(default)]
    pub summarization: bool,

    #[serde(default)]
    pub auto_translate: bool,

    /// Language translations are produced in. Falls back to the speech default.
    pub target_language: Option<String>,
}

impl AiFeatures {
    pub fn any_enabled(&self) -> bool {
        self.cleaning || self.summarization || self.auto_translate
    }
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("speedy-narrator");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("articles.db").to_string_lossy().to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_max_utterance_chars() -> usize {
    MAX_UTTERANCE_CHARS
}

fn default_rate() -> u32 {
    175
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            claude_api_key: None,
            webdriver_url: None,
            extraction: ExtractionSettings::default(),
            speech: SpeechSettings::default(),
            ai: AiFeatures::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("speedy-narrator")
            .join("config.toml")
    }

    pub fn target_language(&self) -> &str {
        self.ai
            .target_language
            .as_deref()
            .unwrap_or(&self.speech.default_language)
    }
}
