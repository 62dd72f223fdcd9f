//! Record types for Faultline
//!
//! Defines the log type taxonomy, the persisted log record and the
//! normalized event handed over by capture adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Built-in log types, in the order they are offered to operators.
pub const DEFAULT_LOG_TYPES: &[&str] = &["error", "warning", "info", "success"];

/// Type of a log record
///
/// The four built-in variants cover the default registry; additional types
/// registered through [`crate::hooks::Hooks::register_log_type`] are carried
/// as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogType {
    Error,
    Warning,
    Info,
    Success,
    Custom(String),
}

impl LogType {
    /// Parse a type name, lowercasing it first. Never fails; use
    /// [`LogType::coerce`] to restrict the result to a registered set.
    pub fn parse(name: &str) -> Self {
        let lower = name.trim().to_lowercase();
        match lower.as_str() {
            "error" => LogType::Error,
            "warning" => LogType::Warning,
            "info" => LogType::Info,
            "success" => LogType::Success,
            _ => LogType::Custom(lower),
        }
    }

    /// Coerce a raw type name into the allowed set. Unknown names become `Info`.
    pub fn coerce(name: &str, allowed: &[String]) -> Self {
        let parsed = Self::parse(name);
        if allowed.iter().any(|a| a == parsed.as_str()) {
            parsed
        } else {
            LogType::Info
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LogType::Error => "error",
            LogType::Warning => "warning",
            LogType::Info => "info",
            LogType::Success => "success",
            LogType::Custom(name) => name,
        }
    }

    /// Returns the emoji representation of the type
    pub fn emoji(&self) -> &'static str {
        match self {
            LogType::Error => "🔴",
            LogType::Warning => "🟠",
            LogType::Info => "🔵",
            LogType::Success => "🟢",
            LogType::Custom(_) => "⚪",
        }
    }

    /// Returns a text alternative for terminals that may not render emojis.
    pub fn text_label(&self) -> String {
        match self {
            LogType::Error => "[ERR]".to_string(),
            LogType::Warning => "[WARN]".to_string(),
            LogType::Info => "[INFO]".to_string(),
            LogType::Success => "[OK]".to_string(),
            LogType::Custom(name) => format!("[{}]", name.to_uppercase()),
        }
    }

    /// Capitalized name, used in mail subjects
    pub fn title(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    }
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LogType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(LogType::parse(&name))
    }
}

/// A persisted log record. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Store-assigned, monotonically increasing id
    pub id: i64,
    #[serde(rename = "type")]
    pub log_type: LogType,
    /// Plain-text message (markup stripped)
    pub message: String,
    /// JSON-encoded context, `None` when the context was empty
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LogRecord {
    /// Decode the stored context, if any
    pub fn context_value(&self) -> Option<serde_json::Value> {
        self.context
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// A record about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub log_type: LogType,
    pub message: String,
    pub context: Option<String>,
}

/// Normalized event produced by a capture adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Adapter discriminator used in the fingerprint (e.g. `runtime_error`)
    pub kind: &'static str,
    pub log_type: LogType,
    pub message: String,
    pub file: String,
    pub line: u32,
    /// Extra fingerprint discriminator such as an error code
    pub extra: String,
    pub context: serde_json::Value,
}

impl RawEvent {
    pub fn new(kind: &'static str, log_type: LogType, message: impl Into<String>) -> Self {
        Self {
            kind,
            log_type,
            message: message.into(),
            file: String::new(),
            line: 0,
            extra: String::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = file.into();
        self.line = line;
        self
    }

    pub fn extra(mut self, extra: impl ToString) -> Self {
        self.extra = extra.to_string();
        self
    }

    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}
