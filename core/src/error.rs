//! Unified error types for Faultline Core
//!
//! Structured error types for every layer of the pipeline. Most of these
//! never escape the logging facade: they are reported through `tracing`
//! and converted into a sentinel record id instead.

use std::path::PathBuf;
use thiserror::Error;

/// Core library error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration file errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Log store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Cached JSON file failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Remote API fetch failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Writing a repaired file failed
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Notification channel failure
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// File is not one of the monitored cache files
    #[error("File is not in the cached JSON file mapping: {0}")]
    UnknownFile(String),

    /// Operator trigger refused for a non-admin principal
    #[error("Unauthorized: {0} requires administrative privilege")]
    Unauthorized(&'static str),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeToml(#[from] toml::ser::Error),

    /// Failed to write config file
    #[error("Failed to write config file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Home directory not found
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Failed to create directory
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Storage-specific errors (log store, dedup store, file sink)
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create log directory
    #[error("Failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create/open log file
    #[error("Failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize a record
    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Failed to write to log file
    #[error("Failed to write to log file: {0}")]
    Write(std::io::Error),

    /// SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// CSV export failure
    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    /// Stored timestamp could not be parsed
    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(String),

    /// The store lock was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Reasons a cached JSON file is considered invalid
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("File does not exist")]
    Missing,

    #[error("Failed to read file")]
    Unreadable,

    #[error("File is empty")]
    Empty,

    /// Carries the parser's human-readable message
    #[error("{0}")]
    Malformed(String),

    #[error("JSON decoded to invalid type (expected array or object)")]
    WrongType,
}

/// Remote API fetch failures
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("API URL is not configured")]
    NotConfigured,

    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("API returned status code {status}: {excerpt}")]
    Status { status: u16, excerpt: String },

    #[error("Failed to parse API response as JSON: {0}")]
    Parse(String),

    #[error("API response is not a JSON object or array")]
    UnexpectedShape,
}

/// Failures while writing a repaired cache file
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode data as JSON: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Notification channel failures. Always swallowed by the notifier.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Endpoint returned status code {0}")]
    Status(u16),

    #[error("Mail delivery failed: {0}")]
    Mail(String),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        assert_eq!(ValidationError::Missing.to_string(), "File does not exist");
        assert_eq!(ValidationError::Unreadable.to_string(), "Failed to read file");
        assert_eq!(ValidationError::Empty.to_string(), "File is empty");
        assert_eq!(
            ValidationError::Malformed("EOF while parsing".into()).to_string(),
            "EOF while parsing"
        );
        assert!(ValidationError::WrongType
            .to_string()
            .contains("decoded to invalid type"));
    }

    #[test]
    fn test_fetch_status_message() {
        let err = FetchError::Status {
            status: 500,
            excerpt: "boom".into(),
        };
        assert_eq!(err.to_string(), "API returned status code 500: boom");
    }

    #[test]
    fn test_core_error_from_storage() {
        let err: CoreError = StorageError::Poisoned.into();
        assert!(err.to_string().starts_with("Storage error"));
    }
}
