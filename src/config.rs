//! Configuration System
//!
//! Loads client configuration from TOML files and environment variables.
//! Every section converts into the settings struct of its component.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::ConnectionSettings;
use crate::dispatch::DispatcherSettings;
use crate::fallback::FallbackSettings;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// WebSocket endpoint and reconnect policy
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_ws_url")]
    pub url: String,

    #[serde(default = "default_token_param")]
    pub token_param: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,
}

fn default_ws_url() -> String {
    "ws://localhost:8000/ws/chat".to_string()
}

fn default_token_param() -> String {
    "token".to_string()
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay() -> u64 {
    1000
}

fn default_reconnect_max_delay() -> u64 {
    30_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_ws_url(),
            token_param: default_token_param(),
            connect_timeout_ms: default_connect_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Treat an unanswered ping as a dead connection
    #[serde(default)]
    pub require_pong: bool,
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            require_pong: false,
        }
    }
}

/// Outbound question limit
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    #[serde(default = "default_window")]
    pub window_ms: u64,
}

fn default_max_messages() -> usize {
    10
}

fn default_window() -> u64 {
    60_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            window_ms: default_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_clear_interval")]
    pub clear_interval_ms: u64,
}

fn default_clear_interval() -> u64 {
    300_000 // 5 minutes
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            clear_interval_ms: default_clear_interval(),
        }
    }
}

/// HTTP fallback endpoint and retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_question_path")]
    pub question_path: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_question_path() -> String {
    "/api/v1/questions".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    30_000
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            question_path: default_question_path(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("chatline").join("config.toml")),
            Some(PathBuf::from("/etc/chatline/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!(path = ?path, "Loaded config");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "Failed to load config");
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `CHATLINE_*` overrides from `lookup`
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(value: Option<String>, target: &mut T) {
            if let Some(v) = value.and_then(|v| v.parse().ok()) {
                *target = v;
            }
        }

        // Connection overrides
        if let Some(url) = lookup("CHATLINE_WS_URL") {
            self.connection.url = url;
        }
        parsed(
            lookup("CHATLINE_MAX_RECONNECT_ATTEMPTS"),
            &mut self.connection.max_reconnect_attempts,
        );
        parsed(
            lookup("CHATLINE_REQUIRE_PONG"),
            &mut self.heartbeat.require_pong,
        );

        // Rate limit overrides
        parsed(
            lookup("CHATLINE_RATE_LIMIT_MAX"),
            &mut self.rate_limit.max_messages,
        );
        parsed(
            lookup("CHATLINE_RATE_LIMIT_WINDOW_MS"),
            &mut self.rate_limit.window_ms,
        );

        // Fallback overrides
        if let Some(url) = lookup("CHATLINE_API_URL") {
            self.fallback.base_url = url;
        }
        parsed(
            lookup("CHATLINE_MAX_RETRIES"),
            &mut self.fallback.max_retries,
        );

        // Logging overrides
        if let Some(level) = lookup("CHATLINE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("CHATLINE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            url: self.connection.url.clone(),
            token_param: self.connection.token_param.clone(),
            connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
            max_reconnect_attempts: self.connection.max_reconnect_attempts,
            reconnect_base_delay: Duration::from_millis(self.connection.reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_millis(self.connection.reconnect_max_delay_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
            require_pong: self.heartbeat.require_pong,
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            rate_limit_max_messages: self.rate_limit.max_messages,
            rate_limit_window: Duration::from_millis(self.rate_limit.window_ms),
            dedup_clear_interval: Duration::from_millis(self.dedup.clear_interval_ms),
        }
    }

    pub fn fallback_settings(&self) -> FallbackSettings {
        FallbackSettings {
            base_url: self.fallback.base_url.clone(),
            question_path: self.fallback.question_path.clone(),
            max_retries: self.fallback.max_retries,
            retry_delay: Duration::from_millis(self.fallback.retry_delay_ms),
            request_timeout: Duration::from_millis(self.fallback.request_timeout_ms),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# chatline configuration
#
# Environment variables override these settings:
# - CHATLINE_WS_URL
# - CHATLINE_MAX_RECONNECT_ATTEMPTS
# - CHATLINE_REQUIRE_PONG
# - CHATLINE_RATE_LIMIT_MAX
# - CHATLINE_RATE_LIMIT_WINDOW_MS
# - CHATLINE_API_URL
# - CHATLINE_MAX_RETRIES
# - CHATLINE_LOG_LEVEL
# - CHATLINE_LOG_FORMAT

[connection]
# WebSocket endpoint
url = "ws://localhost:8000/ws/chat"

# Query parameter carrying the auth token
token_param = "token"

# Abandon a handshake after this long (ms)
connect_timeout_ms = 10000

# Reconnect attempts before giving up
max_reconnect_attempts = 5

# Reconnect delay doubles from base up to max (ms)
reconnect_base_delay_ms = 1000
reconnect_max_delay_ms = 30000

[heartbeat]
# Ping interval (ms)
interval_ms = 30000

# Close the socket if a ping is still unanswered at the next beat
require_pong = false

[rate_limit]
# Questions allowed per sliding window
max_messages = 10
window_ms = 60000

[dedup]
# How often remembered questions are forgotten (ms)
clear_interval_ms = 300000

[fallback]
# REST API used while the WebSocket is unavailable
base_url = "http://localhost:8000"
question_path = "/api/v1/questions"

# Attempts per question; the n-th retry waits retry_delay_ms * n
max_retries = 3
retry_delay_ms = 1000

# Per-request timeout (ms)
request_timeout_ms = 30000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.max_reconnect_attempts, 5);
        assert_eq!(config.rate_limit.max_messages, 10);
        assert_eq!(config.fallback.question_path, "/api/v1/questions");

        let settings = config.connection_settings();
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(30));
        assert!(!settings.require_pong);
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.connection.url, defaults.connection.url);
        assert_eq!(config.dedup.clear_interval_ms, defaults.dedup.clear_interval_ms);
        assert_eq!(config.fallback.retry_delay_ms, defaults.fallback.retry_delay_ms);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[rate_limit]\nmax_messages = 2\n\n[heartbeat]\nrequire_pong = true"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.rate_limit.max_messages, 2);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert!(config.heartbeat.require_pong);
        assert_eq!(config.connection.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/nonexistent/chatline.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection\nurl = ").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CHATLINE_WS_URL", "wss://chat.example/ws"),
            ("CHATLINE_RATE_LIMIT_MAX", "3"),
            ("CHATLINE_MAX_RETRIES", "not-a-number"),
            ("CHATLINE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.connection.url, "wss://chat.example/ws");
        assert_eq!(config.rate_limit.max_messages, 3);
        assert_eq!(config.fallback.max_retries, 3);
        assert_eq!(config.logging.format, "json");
    }
}
