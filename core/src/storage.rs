//! File sink for Faultline
//!
//! Appends one JSON object per record (JSON Lines) to a file named after
//! the current UTC date. Writes take an exclusive advisory lock so lines
//! from concurrent processes never interleave.

use crate::error::{CoreError, StorageError};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use fs2::FileExt;
use serde::Serialize;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File extension of dated sink files
pub const SINK_EXTENSION: &str = "log";

/// One line of the file sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkEntry<'a> {
    /// ISO-8601 UTC timestamp
    pub ts: String,
    #[serde(rename = "type")]
    pub log_type: &'a str,
    pub message: &'a str,
    pub context: &'a Value,
}

impl<'a> SinkEntry<'a> {
    pub fn new(at: DateTime<Utc>, log_type: &'a str, message: &'a str, context: &'a Value) -> Self {
        Self {
            ts: at.to_rfc3339_opts(SecondsFormat::Secs, false),
            log_type,
            message,
            context,
        }
    }
}

/// Dated JSON Lines writer
#[derive(Debug, Clone)]
pub struct FileSink {
    log_dir: PathBuf,
}

impl FileSink {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Default file for `day`: `{log_dir}/YYYY-MM-DD.log`
    pub fn default_path(&self, day: NaiveDate) -> PathBuf {
        self.log_dir
            .join(format!("{}.{}", day.format("%Y-%m-%d"), SINK_EXTENSION))
    }

    /// Append `entry` to `file_path`, creating the parent directory if needed
    pub fn append(&self, file_path: &Path, entry: &SinkEntry<'_>) -> Result<(), CoreError> {
        if let Some(parent) = file_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let mut line = serde_json::to_string(entry).map_err(StorageError::Serialize)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)
            .map_err(|e| StorageError::OpenFile {
                path: file_path.to_path_buf(),
                source: e,
            })?;

        file.lock_exclusive().map_err(StorageError::Write)?;
        let written = file.write_all(line.as_bytes()).map_err(StorageError::Write);
        let _ = FileExt::unlock(&file);
        written?;
        Ok(())
    }
}

/// Remove sink files last modified before `now - retention_days`
pub fn cleanup_old_logs(
    log_dir: &Path,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<usize, CoreError> {
    if retention_days == 0 || !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = now - chrono::Duration::days(retention_days as i64);
    let mut removed = 0;

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some(SINK_EXTENSION) {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(_) => continue,
        };
        if modified < cutoff && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}
