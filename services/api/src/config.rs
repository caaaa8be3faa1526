use colloquy_core::{DEFAULT_MAX_ITERATIONS, GatewayConfig};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub stt_url: String,
    pub tts_url: String,
    pub chat_url: String,
    pub stt_timeout: Duration,
    pub tts_timeout: Duration,
    pub chat_timeout: Duration,
    /// Sessions open longer than this are closed with `session_timeout`.
    pub max_session_duration: Duration,
    pub default_voice_id: String,
    pub default_provider: String,
    /// Client API key. `None` disables client authentication.
    pub api_key: Option<String>,
    /// Pre-shared key sent to the backends.
    pub service_psk: Option<String>,
    pub max_tool_iterations: usize,
    /// Run websocket turns through the tool loop instead of raw streaming.
    pub session_tools: bool,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        let gateway = GatewayConfig::default();
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8000)),
            stt_url: gateway.stt_url,
            tts_url: gateway.tts_url,
            chat_url: gateway.chat_url,
            stt_timeout: gateway.stt_timeout,
            tts_timeout: gateway.tts_timeout,
            chat_timeout: gateway.chat_timeout,
            max_session_duration: Duration::from_secs(300),
            default_voice_id: "default".to_string(),
            default_provider: gateway.default_provider,
            api_key: None,
            service_psk: None,
            max_tool_iterations: DEFAULT_MAX_ITERATIONS,
            session_tools: false,
            log_level: Level::INFO,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = Self::default();

        let bind_address = parse_var("BIND_ADDRESS", defaults.bind_address)?;

        let stt_url = url_var("STT_URL", defaults.stt_url)?;
        let tts_url = url_var("TTS_URL", defaults.tts_url)?;
        let chat_url = url_var("CHAT_URL", defaults.chat_url)?;

        let stt_timeout = secs_var("STT_TIMEOUT_SECS", defaults.stt_timeout)?;
        let tts_timeout = secs_var("TTS_TIMEOUT_SECS", defaults.tts_timeout)?;
        let chat_timeout = secs_var("CHAT_TIMEOUT_SECS", defaults.chat_timeout)?;
        let max_session_duration = secs_var("MAX_SESSION_SECONDS", defaults.max_session_duration)?;

        let default_voice_id =
            optional_var("DEFAULT_VOICE_ID").unwrap_or(defaults.default_voice_id);
        let default_provider =
            optional_var("DEFAULT_PROVIDER").unwrap_or(defaults.default_provider);

        let api_key = optional_var("API_KEY");
        let service_psk = optional_var("SERVICE_PSK");

        let max_tool_iterations = parse_var("MAX_TOOL_ITERATIONS", defaults.max_tool_iterations)?;
        if max_tool_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_TOOL_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let session_tools = bool_var("SESSION_TOOLS", defaults.session_tools)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            stt_url,
            tts_url,
            chat_url,
            stt_timeout,
            tts_timeout,
            chat_timeout,
            max_session_duration,
            default_voice_id,
            default_provider,
            api_key,
            service_psk,
            max_tool_iterations,
            session_tools,
            log_level,
        })
    }

    /// The subset of the configuration the backend gateway needs.
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            stt_url: self.stt_url.clone(),
            tts_url: self.tts_url.clone(),
            chat_url: self.chat_url.clone(),
            stt_timeout: self.stt_timeout,
            tts_timeout: self.tts_timeout,
            chat_timeout: self.chat_timeout,
            default_provider: self.default_provider.clone(),
            service_psk: self.service_psk.clone(),
        }
    }
}

/// Reads a variable, treating an empty value as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(name, default.as_secs()).map(Duration::from_secs)
}

fn url_var(name: &str, default: String) -> Result<String, ConfigError> {
    let url = optional_var(name).unwrap_or(default);
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url)
    } else {
        Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not an http(s) URL", url),
        ))
    }
}

fn bool_var(name: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_var(name).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a boolean", v),
        )),
    }
}
