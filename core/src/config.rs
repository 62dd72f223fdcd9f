//! Configuration module for Faultline
//!
//! Handles loading, parsing, and sanitization of configuration files.
//! Default configuration path: `~/.faultline/config.toml`

use crate::error::{ConfigError, CoreError};
use crate::event::DEFAULT_LOG_TYPES;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding `checker.api_url`
pub const ENV_API_URL: &str = "FAULTLINE_API_URL";
/// Environment variable overriding `checker.api_token`
pub const ENV_API_TOKEN: &str = "FAULTLINE_API_TOKEN";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage, retention and dedup settings
    pub logging: LoggingConfig,
    /// Notification channels
    pub notify: NotifyConfig,
    /// Capture source toggles
    pub capture: CaptureConfig,
    /// Cached JSON checker settings
    pub checker: CheckerConfig,
}

impl Config {
    /// Load configuration from default path (~/.faultline/config.toml)
    pub fn load() -> Result<Self, CoreError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string. The result is sanitized.
    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseToml)?;
        Ok(config.sanitized())
    }

    /// Normalize user-provided values the same way the settings form does:
    /// clamp retention, keep only known notify types, drop invalid
    /// addresses and non-http(s) URLs.
    pub fn sanitized(mut self) -> Self {
        self.logging.retention_days = self.logging.retention_days.max(1);

        let mut types = Vec::new();
        for known in DEFAULT_LOG_TYPES {
            if self.notify.types.iter().any(|t| t.eq_ignore_ascii_case(known)) {
                types.push(known.to_string());
            }
        }
        self.notify.types = types;

        self.notify.email = sanitize_email(&self.notify.email);
        self.notify.slack_webhook_url = sanitize_url(&self.notify.slack_webhook_url);
        self.notify.webhook_url = sanitize_url(&self.notify.webhook_url);
        self.notify.site_url = sanitize_url(&self.notify.site_url);
        self.checker.api_url = sanitize_url(&self.checker.api_url);
        self
    }

    /// Apply `FAULTLINE_API_URL` / `FAULTLINE_API_TOKEN` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.checker.api_url = sanitize_url(&url);
            }
        }
        if let Ok(token) = std::env::var(ENV_API_TOKEN) {
            if !token.trim().is_empty() {
                self.checker.api_token = token.trim().to_string();
            }
        }
        self
    }

    /// Get the base configuration directory path (~/.faultline)
    fn config_base_dir() -> Result<PathBuf, CoreError> {
        dirs::home_dir()
            .ok_or(ConfigError::NoHomeDir)
            .map(|home| home.join(".faultline"))
            .map_err(CoreError::Config)
    }

    /// Get default configuration file path
    pub fn default_path() -> Result<PathBuf, CoreError> {
        Self::config_base_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get default file-sink directory path
    pub fn default_log_dir() -> Result<PathBuf, CoreError> {
        Self::config_base_dir().map(|dir| dir.join("logs"))
    }

    /// Get default database path
    pub fn default_database_path() -> Result<PathBuf, CoreError> {
        Self::config_base_dir().map(|dir| dir.join("faultline.db"))
    }

    /// Get default cache directory for monitored JSON files
    pub fn default_cache_dir() -> Result<PathBuf, CoreError> {
        Self::config_base_dir().map(|dir| dir.join("cache").join("global"))
    }

    /// Ensure configuration directory exists
    pub fn ensure_config_dir() -> Result<PathBuf, CoreError> {
        let config_dir = Self::config_base_dir()?;
        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::CreateDir {
                path: config_dir.clone(),
                source: e,
            })?;
        }
        Ok(config_dir)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> Result<(), CoreError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::SerializeToml)?;
        std::fs::write(path, content).map_err(|e| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also append records to dated JSON-lines files
    pub enable_file_logging: bool,
    /// File-sink directory (default: ~/.faultline/logs)
    pub log_dir: Option<PathBuf>,
    /// Database path (default: ~/.faultline/faultline.db)
    pub database_path: Option<PathBuf>,
    /// Record retention in days (minimum 1)
    pub retention_days: u32,
    /// Dedup window in hours (0 = in-memory dedup only)
    pub dedup_period_hours: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_file_logging: false,
            log_dir: None,
            database_path: None,
            retention_days: 30,
            dedup_period_hours: 24,
        }
    }
}

impl LoggingConfig {
    /// Get effective log directory (custom or default)
    pub fn effective_log_dir(&self) -> Result<PathBuf, CoreError> {
        match &self.log_dir {
            Some(path) => Ok(path.clone()),
            None => Config::default_log_dir(),
        }
    }

    /// Get effective database path (custom or default)
    pub fn effective_database_path(&self) -> Result<PathBuf, CoreError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Config::default_database_path(),
        }
    }

    /// Dedup window as a chrono duration
    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.dedup_period_hours as i64)
    }
}

/// Notification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Types that trigger webhook and email notifications
    pub types: Vec<String>,
    /// Notification email address (empty = disabled)
    pub email: String,
    /// Chat (Slack-compatible) incoming webhook URL (empty = disabled)
    pub slack_webhook_url: String,
    /// Generic JSON webhook URL (empty = disabled)
    pub webhook_url: String,
    /// Site identifier included in payloads
    pub site_url: String,
    /// Human-readable site name for chat templates
    pub site_name: String,
    /// Per-request timeout for outbound notifications
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            types: vec!["error".to_string(), "warning".to_string()],
            email: String::new(),
            slack_webhook_url: String::new(),
            webhook_url: String::new(),
            site_url: String::new(),
            site_name: String::new(),
            timeout_secs: 5,
        }
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Host part of `site_url`, falling back to the raw value
    pub fn site_host(&self) -> String {
        reqwest::Url::parse(&self.site_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.site_url.clone())
    }
}

/// Capture source toggles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Non-fatal runtime errors (notices, warnings, errors)
    pub runtime_errors: bool,
    /// Uncaught exceptions / panics
    pub panics: bool,
    /// Fatal errors detected at shutdown
    pub shutdown_fatal: bool,
    /// Outbound HTTP failures and non-2xx responses
    pub http_failures: bool,
    /// Host error objects receiving errors (noisy)
    pub host_errors: bool,
    /// Scheduler spawn failures
    pub cron_failures: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            runtime_errors: true,
            panics: true,
            shutdown_fatal: true,
            http_failures: true,
            host_errors: false,
            cron_failures: true,
        }
    }
}

/// Cached JSON checker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Directory holding the monitored JSON files
    pub cache_dir: Option<PathBuf>,
    /// Base URL of the remote content API
    pub api_url: String,
    /// Optional bearer token for the remote API
    pub api_token: String,
    /// Fetch timeout in seconds
    pub timeout_secs: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            api_url: String::new(),
            api_token: String::new(),
            timeout_secs: 30,
        }
    }
}

impl CheckerConfig {
    /// Get effective cache directory (custom or default)
    pub fn effective_cache_dir(&self) -> Result<PathBuf, CoreError> {
        match &self.cache_dir {
            Some(path) => Ok(path.clone()),
            None => Config::default_cache_dir(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Minimal address check: one `@`, non-empty local part, dotted domain,
/// no whitespace. Returns the trimmed address or an empty string.
pub fn sanitize_email(raw: &str) -> String {
    let email = raw.trim();
    if email.chars().any(char::is_whitespace) {
        return String::new();
    }
    let Some((local, domain)) = email.split_once('@') else {
        return String::new();
    };
    let valid = !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if valid {
        email.to_string()
    } else {
        String::new()
    }
}

/// Whether an address passes [`sanitize_email`]
pub fn is_valid_email(raw: &str) -> bool {
    !raw.is_empty() && sanitize_email(raw) == raw.trim()
}

/// Keep only absolute http(s) URLs
pub fn sanitize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match reqwest::Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => trimmed.to_string(),
        _ => String::new(),
    }
}
