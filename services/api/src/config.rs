//! Application Configuration
//!
//! All configuration is loaded from environment variables (with `.env`
//! support via `dotenvy`) once at startup.

use std::{collections::HashMap, net::SocketAddr};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub api_base: String,
    pub chat_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub asr_model: String,
    /// Upstream server URL for `/proxy-ws` relay sessions. Relay upgrades are
    /// rejected when unset.
    pub relay_upstream_url: Option<String>,
    /// Duration of one lip-sync volume chunk in milliseconds.
    pub slice_length_ms: u32,
    pub character_name: String,
    pub character_avatar: String,
    pub persona_prompt: String,
    /// Emotion keyword → avatar expression index, as a JSON object. Empty
    /// means expression extraction is disabled.
    pub expression_map: HashMap<String, i32>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:12393".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let tts_model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let tts_voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "alloy".to_string());
        let asr_model = std::env::var("ASR_MODEL").unwrap_or_else(|_| "whisper-1".to_string());

        let relay_upstream_url = std::env::var("RELAY_UPSTREAM_URL").ok();

        let slice_length_str =
            std::env::var("SLICE_LENGTH_MS").unwrap_or_else(|_| "20".to_string());
        let slice_length_ms = slice_length_str.parse::<u32>().map_err(|e| {
            ConfigError::InvalidValue("SLICE_LENGTH_MS".to_string(), e.to_string())
        })?;
        if slice_length_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "SLICE_LENGTH_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let character_name =
            std::env::var("CHARACTER_NAME").unwrap_or_else(|_| "Stagecast".to_string());
        let character_avatar = std::env::var("CHARACTER_AVATAR").unwrap_or_default();
        let persona_prompt = std::env::var("PERSONA_PROMPT").unwrap_or_else(|_| {
            "You are a friendly on-screen character. Keep responses short and spoken-word."
                .to_string()
        });

        let expression_map = match std::env::var("EXPRESSION_MAP") {
            Ok(json) => serde_json::from_str::<HashMap<String, i32>>(&json).map_err(|e| {
                ConfigError::InvalidValue("EXPRESSION_MAP".to_string(), e.to_string())
            })?,
            Err(_) => HashMap::new(),
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            api_base,
            chat_model,
            tts_model,
            tts_voice,
            asr_model,
            relay_upstream_url,
            slice_length_ms,
            character_name,
            character_avatar,
            persona_prompt,
            expression_map,
            log_level,
        })
    }
}
