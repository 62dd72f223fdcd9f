//! Record rendering for operators
//!
//! Renders stored log records in several output formats.

use crate::event::{LogRecord, LogType};
use colored::Colorize;
use std::io::{self, Write};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable format for terminal
    #[default]
    Pretty,
    /// JSON Lines format for machine processing
    JsonLines,
    /// Compact single-line format
    Compact,
}

/// Formatter configuration
#[derive(Debug, Clone)]
pub struct FormatterConfig {
    pub format: OutputFormat,
    /// Whether to show timestamps
    pub show_timestamps: bool,
    /// Whether to use colors (for Pretty format)
    pub use_colors: bool,
    /// Show the context below the message (Pretty format)
    pub show_context: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pretty,
            show_timestamps: true,
            use_colors: true,
            show_context: false,
        }
    }
}

/// Record formatter
#[derive(Debug, Clone, Default)]
pub struct RecordFormatter {
    config: FormatterConfig,
}

impl RecordFormatter {
    pub fn new(config: FormatterConfig) -> Self {
        Self { config }
    }

    /// Format a record according to the configuration
    pub fn format(&self, record: &LogRecord) -> String {
        match self.config.format {
            OutputFormat::Pretty => self.format_pretty(record),
            OutputFormat::JsonLines => self.format_json(record),
            OutputFormat::Compact => self.format_compact(record),
        }
    }

    /// Write a record to the given writer
    pub fn write<W: Write>(&self, record: &LogRecord, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "{}", self.format(record))
    }

    fn format_pretty(&self, record: &LogRecord) -> String {
        let mut parts = Vec::new();

        let id = format!("#{}", record.id);
        parts.push(if self.config.use_colors {
            id.dimmed().to_string()
        } else {
            id
        });

        if self.config.show_timestamps {
            let time = record.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
            parts.push(if self.config.use_colors {
                time.dimmed().to_string()
            } else {
                time
            });
        }

        parts.push(record.log_type.emoji().to_string());

        let message = if self.config.use_colors {
            match record.log_type {
                LogType::Error => record.message.red().bold().to_string(),
                LogType::Warning => record.message.yellow().to_string(),
                LogType::Success => record.message.green().to_string(),
                LogType::Info | LogType::Custom(_) => record.message.clone(),
            }
        } else {
            record.message.clone()
        };
        parts.push(message);

        let mut line = parts.join("  ");
        if self.config.show_context {
            if let Some(context) = record.context_value() {
                let pretty = serde_json::to_string_pretty(&context).unwrap_or_default();
                for ctx_line in pretty.lines() {
                    line.push_str("\n    ");
                    line.push_str(ctx_line);
                }
            }
        }
        line
    }

    fn format_json(&self, record: &LogRecord) -> String {
        serde_json::to_string(record).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }

    fn format_compact(&self, record: &LogRecord) -> String {
        let time = record.created_at.format("%H:%M:%S");
        let level = match &record.log_type {
            LogType::Error => "ERR ".to_string(),
            LogType::Warning => "WARN".to_string(),
            LogType::Info => "INFO".to_string(),
            LogType::Success => "OK  ".to_string(),
            LogType::Custom(name) => name.to_uppercase(),
        };
        format!("{} [{}] {}: {}", time, level, record.id, record.message)
    }
}
