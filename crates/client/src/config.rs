//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Backend used when running in development mode without an override.
pub const DEV_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API base URL is not configured. Set ADHDERS_BACKEND_URL or ADHDERS_API_URL.")]
    MissingBaseUrl,
    #[error("invalid API base URL `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Runtime configuration for the client stack.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend origin without trailing slash, e.g. `https://api.example.com`.
    pub base_url: String,
    pub request_timeout: Duration,
    /// Whether the live-update channel may be opened at all.
    pub live_updates: bool,
    /// Directory for durable key-value files. `None` keeps everything in memory.
    pub storage_dir: Option<PathBuf>,
    pub dev_mode: bool,
}

impl ClientConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ADHDERS_BACKEND_URL` / `ADHDERS_API_URL`: backend origin (first wins)
    /// - `ADHDERS_DEV`: "1" | "true" enables the localhost fallback (default: debug builds)
    /// - `ADHDERS_STORAGE_DIR`: storage directory (default: `<config dir>/adhders`)
    /// - `ADHDERS_REQUEST_TIMEOUT_SECS`: HTTP timeout (default: 30)
    /// - `ADHDERS_LIVE_UPDATES`: "0" | "false" disables the live channel (default: enabled)
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_override = std::env::var("ADHDERS_BACKEND_URL")
            .ok()
            .or_else(|| std::env::var("ADHDERS_API_URL").ok());

        let dev_mode = std::env::var("ADHDERS_DEV")
            .ok()
            .map(|v| parse_flag(&v))
            .unwrap_or(cfg!(debug_assertions));

        let base_url = resolve_base_url(env_override.as_deref(), dev_mode)?;

        let request_timeout = std::env::var("ADHDERS_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let live_updates = std::env::var("ADHDERS_LIVE_UPDATES")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        let storage_dir = std::env::var("ADHDERS_STORAGE_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|dir| dir.join("adhders")));

        Ok(Self {
            base_url,
            request_timeout,
            live_updates,
            storage_dir,
            dev_mode,
        })
    }

    /// Configuration pointing at a fixed backend, with in-memory storage.
    pub fn for_base_url(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: resolve_base_url(Some(base_url), false)?,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            live_updates: true,
            storage_dir: None,
            dev_mode: false,
        })
    }
}

/// Resolve the backend origin: explicit override, then the development default,
/// otherwise a hard error.
pub fn resolve_base_url(env_override: Option<&str>, dev_mode: bool) -> Result<String, ConfigError> {
    if let Some(raw) = env_override.map(str::trim).filter(|s| !s.is_empty()) {
        let trimmed = raw.trim_end_matches('/');
        url::Url::parse(trimmed).map_err(|e| ConfigError::InvalidBaseUrl {
            url: trimmed.to_string(),
            reason: e.to_string(),
        })?;
        return Ok(trimmed.to_string());
    }

    if dev_mode {
        return Ok(DEV_BACKEND_URL.to_string());
    }

    tracing::error!("{}", ConfigError::MissingBaseUrl);
    Err(ConfigError::MissingBaseUrl)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
