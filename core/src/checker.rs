//! Cached JSON integrity checker
//!
//! Validates a fixed set of cached JSON documents. A missing, unreadable,
//! empty, malformed or scalar document is replaced with a fresh copy from
//! the remote content API. Every outcome is reported through the logging
//! facade and the chat webhook.
//!
//! Checks of the same file are serialized within the process; the write
//! itself takes an exclusive file lock so separate processes never
//! interleave partial content.

use crate::config::Config;
use crate::error::{CoreError, FetchError, ValidationError, WriteError};
use crate::logger::{LogEntry, Logger};
use crate::notify::SendResult;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Monitored files and the remote handle each one is rebuilt from
pub const FILE_HANDLE_MAP: &[(&str, &str)] = &[
    ("globalsetting.json", "global_settings"),
    ("seoglobalsetting.json", "seo_global_settings"),
    ("globalservices.json", "services"),
    ("globalmicrosites.json", "microsites"),
];

/// Characters of a non-200 body kept in the error
const EXCERPT_LEN: usize = 200;

/// Sender name of checker chat messages
const CHAT_USERNAME: &str = "Faultline JSON Checker";

/// One monitored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsonFileEntry {
    pub filename: String,
    pub remote_handle: String,
    pub path: PathBuf,
}

/// Outcome of checking one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub file: String,
    pub path: PathBuf,
    pub exists: bool,
    pub valid: bool,
    pub error: Option<String>,
    pub repaired: bool,
    pub repair_error: Option<String>,
}

impl CheckResult {
    fn new(filename: &str, path: &Path) -> Self {
        Self {
            file: filename.to_string(),
            path: path.to_path_buf(),
            exists: false,
            valid: false,
            error: None,
            repaired: false,
            repair_error: None,
        }
    }
}

/// Aggregate over the whole file set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchCheckResult {
    pub checked: usize,
    pub valid: usize,
    pub invalid: usize,
    pub repaired: usize,
    pub failed: usize,
    pub details: BTreeMap<String, CheckResult>,
}

impl BatchCheckResult {
    fn add(&mut self, result: CheckResult) {
        self.checked += 1;
        // A repaired file reports valid = true, so classify on `error`
        if result.error.is_none() {
            self.valid += 1;
        } else {
            self.invalid += 1;
            if result.repaired {
                self.repaired += 1;
            } else {
                self.failed += 1;
            }
        }
        self.details.insert(result.file.clone(), result);
    }
}

/// Source of replacement documents
pub trait GlobalSetSource: Send + Sync {
    /// Fetch the document for `handle`. Only objects and arrays are returned.
    fn fetch(&self, handle: &str) -> Result<Value, FetchError>;
}

/// Remote content API client
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.checker.api_url.clone(),
            config.checker.api_token.clone(),
            config.checker.timeout(),
        )
    }

    /// `{base_url}/global-sets/{handle}`
    pub fn url_for(&self, handle: &str) -> Result<String, FetchError> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(FetchError::NotConfigured);
        }
        Ok(format!("{}/global-sets/{}", base.trim_end_matches('/'), handle))
    }
}

impl GlobalSetSource for ApiClient {
    fn fetch(&self, handle: &str) -> Result<Value, FetchError> {
        let url = self.url_for(handle)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        let mut request = client.get(&url).header("Accept", "application/json");
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        debug!(url = %url, "fetching global set");
        let response = request
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if status != 200 {
            return Err(FetchError::Status {
                status,
                excerpt: body.chars().take(EXCERPT_LEN).collect(),
            });
        }

        let data: Value =
            serde_json::from_str(&body).map_err(|e| FetchError::Parse(e.to_string()))?;
        if !(data.is_object() || data.is_array()) {
            return Err(FetchError::UnexpectedShape);
        }
        Ok(data)
    }
}

/// Validate one cached file. `exists` is reported even when validation fails.
pub fn validate_file(path: &Path) -> (bool, Result<(), ValidationError>) {
    if !path.exists() {
        return (false, Err(ValidationError::Missing));
    }
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return (true, Err(ValidationError::Unreadable)),
    };
    let content = match std::str::from_utf8(&bytes) {
        Ok(content) => content,
        Err(_) => {
            return (
                true,
                Err(ValidationError::Malformed(
                    "Malformed UTF-8 characters".to_string(),
                )),
            )
        }
    };
    if content.trim().is_empty() {
        return (true, Err(ValidationError::Empty));
    }
    match serde_json::from_str::<Value>(content) {
        Err(e) => (true, Err(ValidationError::Malformed(e.to_string()))),
        Ok(Value::Object(_)) | Ok(Value::Array(_)) => (true, Ok(())),
        Ok(_) => (true, Err(ValidationError::WrongType)),
    }
}

/// Write `data` as compact JSON under an exclusive lock. The file is only
/// truncated once the lock is held and the content is encoded.
pub fn write_json_file(path: &Path, data: &Value) -> Result<usize, WriteError> {
    let encoded = serde_json::to_vec(data)?;

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| WriteError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| WriteError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

    file.lock_exclusive().map_err(|e| WriteError::Lock {
        path: path.to_path_buf(),
        source: e,
    })?;

    let written = file
        .set_len(0)
        .and_then(|_| file.write_all(&encoded))
        .and_then(|_| file.flush())
        .map_err(|e| WriteError::Write {
            path: path.to_path_buf(),
            source: e,
        });
    let _ = FileExt::unlock(&file);
    written?;

    Ok(encoded.len())
}

fn chat_footer(config: &Config) -> Value {
    json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": format!("🔧 Faultline JSON Checker | {}", config.notify.site_url),
        }],
    })
}

fn site_fields(config: &Config, at: DateTime<Utc>) -> Value {
    json!({
        "type": "section",
        "fields": [
            { "type": "mrkdwn", "text": format!("*Site:*\n{}", config.notify.site_name) },
            { "type": "mrkdwn", "text": format!("*Time:*\n{}", at.format("%Y-%m-%d %H:%M:%S")) },
        ],
    })
}

/// Chat message sent after a successful repair
pub fn repaired_chat_message(
    config: &Config,
    filename: &str,
    original_error: &str,
    at: DateTime<Utc>,
) -> Value {
    json!({
        "text": format!("⚠️ {filename} was invalid and has been fixed!"),
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": "⚠️ JSON File Invalid - Auto Fixed", "emoji": true },
            },
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "*`{filename}`* was found to be invalid and has been automatically fixed!\n\nThe file was resynced from the remote API."
                    ),
                },
            },
            { "type": "divider" },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*Error Found:*\n{original_error}") },
                    { "type": "mrkdwn", "text": "*Status:*\n✅ Fixed Successfully" },
                ],
            },
            site_fields(config, at),
            chat_footer(config),
        ],
        "username": CHAT_USERNAME,
        "icon_emoji": ":warning:",
    })
}

/// Chat message sent when a repair failed
pub fn repair_failed_chat_message(
    config: &Config,
    filename: &str,
    original_error: &str,
    repair_error: &str,
    at: DateTime<Utc>,
) -> Value {
    json!({
        "text": format!("🚨 CRITICAL: {filename} is invalid and repair FAILED!"),
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": "🚨 JSON File Invalid - Repair FAILED", "emoji": true },
            },
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "*`{filename}`* was found to be invalid and *could NOT be repaired automatically*!\n\nManual intervention required."
                    ),
                },
            },
            { "type": "divider" },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*Original Error:*\n{original_error}") },
                    { "type": "mrkdwn", "text": format!("*Repair Error:*\n{repair_error}") },
                ],
            },
            site_fields(config, at),
            chat_footer(config),
        ],
        "username": CHAT_USERNAME,
        "icon_emoji": ":rotating_light:",
    })
}

/// Validates and repairs the monitored files
pub struct JsonChecker {
    cache_dir: PathBuf,
    source: Arc<dyn GlobalSetSource>,
    logger: Arc<Logger>,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for JsonChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonChecker")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl JsonChecker {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        source: Arc<dyn GlobalSetSource>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source,
            logger,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The fixed file mapping, resolved against the cache directory
    pub fn file_map(&self) -> Vec<JsonFileEntry> {
        FILE_HANDLE_MAP
            .iter()
            .map(|(filename, handle)| JsonFileEntry {
                filename: filename.to_string(),
                remote_handle: handle.to_string(),
                path: self.cache_dir.join(filename),
            })
            .collect()
    }

    /// Check every monitored file
    pub fn check_all(&self) -> BatchCheckResult {
        let mut batch = BatchCheckResult::default();
        for entry in self.file_map() {
            batch.add(self.check_file(&entry.path, &entry.filename, &entry.remote_handle));
        }
        info!(
            checked = batch.checked,
            valid = batch.valid,
            repaired = batch.repaired,
            failed = batch.failed,
            "cached JSON check finished"
        );
        batch
    }

    /// Check one monitored file by name
    pub fn check_specific_file(&self, filename: &str) -> Result<CheckResult, CoreError> {
        let handle = FILE_HANDLE_MAP
            .iter()
            .find(|(name, _)| *name == filename)
            .map(|(_, handle)| *handle)
            .ok_or_else(|| CoreError::UnknownFile(filename.to_string()))?;
        Ok(self.check_file(&self.cache_dir.join(filename), filename, handle))
    }

    /// Validate `path` and repair it from `handle` when invalid
    pub fn check_file(&self, path: &Path, filename: &str, handle: &str) -> CheckResult {
        let lock = self.path_lock(path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut result = CheckResult::new(filename, path);
        let (exists, validation) = validate_file(path);
        result.exists = exists;

        match validation {
            Ok(()) => {
                result.valid = true;
                result
            }
            Err(e) => {
                result.error = Some(e.to_string());
                self.attempt_repair(result, handle)
            }
        }
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn attempt_repair(&self, mut result: CheckResult, handle: &str) -> CheckResult {
        let original_error = result.error.clone().unwrap_or_default();
        warn!(file = %result.file, error = %original_error, "cached JSON file invalid");

        self.logger.record(
            LogEntry::new(
                "warning",
                format!("Cached JSON file error detected: {}", result.file),
            )
            .context(json!({
                "file": result.file,
                "path": result.path.display().to_string(),
                "error": original_error,
            }))
            .without_dedup(),
        );

        let repaired = self
            .source
            .fetch(handle)
            .map_err(CoreError::from)
            .and_then(|data| write_json_file(&result.path, &data).map_err(CoreError::from));

        match repaired {
            Ok(bytes) => {
                debug!(file = %result.file, bytes, "cached JSON file rewritten");
                result.repaired = true;
                result.valid = true;
                self.send_chat(repaired_chat_message(
                    self.logger.config(),
                    &result.file,
                    &original_error,
                    self.logger.clock().now(),
                ));
                self.logger.record(
                    LogEntry::new("success", format!("Cached JSON file repaired: {}", result.file))
                        .context(json!({
                            "file": result.file,
                            "original_error": original_error,
                            "action": "Resynced from remote API",
                        }))
                        .alert(true)
                        .without_dedup(),
                );
            }
            Err(e) => {
                let repair_error = inner_message(&e);
                warn!(file = %result.file, error = %repair_error, "cached JSON repair failed");
                self.send_chat(repair_failed_chat_message(
                    self.logger.config(),
                    &result.file,
                    &original_error,
                    &repair_error,
                    self.logger.clock().now(),
                ));
                self.logger.record(
                    LogEntry::new(
                        "error",
                        format!("Failed to repair cached JSON file: {}", result.file),
                    )
                    .context(json!({
                        "file": result.file,
                        "repair_error": repair_error,
                    }))
                    .alert(true)
                    .without_dedup(),
                );
                result.repair_error = Some(repair_error);
            }
        }
        result
    }

    fn send_chat(&self, payload: Value) {
        let sent = self
            .logger
            .notifier()
            .send_chat(self.logger.config(), &payload);
        if let SendResult::Failed(e) = sent {
            warn!(error = %e, "checker chat message not delivered");
        }
    }
}

/// Error text without the layer prefix
fn inner_message(error: &CoreError) -> String {
    match error {
        CoreError::Fetch(e) => e.to_string(),
        CoreError::Write(e) => e.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LogType;
    use crate::hooks::Hooks;
    use crate::notify::{Notifier, RecordingTransport};
    use crate::sqlite_storage::LogStore;
    use crate::types::ManualClock;
    use chrono::TimeZone;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use tempfile::TempDir;

    /// Serves a fixed response per handle and counts calls
    struct FakeSource {
        responses: HashMap<String, Result<Value, u16>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn ok(mut self, handle: &str, data: Value) -> Self {
            self.responses.insert(handle.to_string(), Ok(data));
            self
        }

        fn status(mut self, handle: &str, status: u16) -> Self {
            self.responses.insert(handle.to_string(), Err(status));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl GlobalSetSource for FakeSource {
        fn fetch(&self, handle: &str) -> Result<Value, FetchError> {
            self.calls.lock().unwrap().push(handle.to_string());
            match self.responses.get(handle) {
                Some(Ok(data)) => Ok(data.clone()),
                Some(Err(status)) => Err(FetchError::Status {
                    status: *status,
                    excerpt: "Internal Server Error".to_string(),
                }),
                None => Err(FetchError::NotConfigured),
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        checker: JsonChecker,
        source: Arc<FakeSource>,
        logger: Arc<Logger>,
        recorder: Arc<RecordingTransport>,
    }

    fn fixture(source: FakeSource) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.notify.slack_webhook_url = "https://hooks.example.com/chat".into();
        config.notify.site_name = "Demo".into();
        let recorder = Arc::new(RecordingTransport::new());
        let logger = Arc::new(Logger::new(
            Arc::new(config),
            Arc::new(Hooks::new()),
            Arc::new(LogStore::in_memory().unwrap()),
            Arc::new(Notifier::new(recorder.clone(), recorder.clone())),
            Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            )),
        ));
        let source = Arc::new(source);
        let checker = JsonChecker::new(dir.path().join("cache"), source.clone(), logger.clone());
        Fixture {
            _dir: dir,
            checker,
            source,
            logger,
            recorder,
        }
    }

    fn write(f: &Fixture, filename: &str, content: &str) -> PathBuf {
        let path = f.checker.cache_dir().join(filename);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_validate_file_states() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");
        assert_eq!(validate_file(&path), (false, Err(ValidationError::Missing)));

        std::fs::write(&path, "   \n").unwrap();
        assert_eq!(validate_file(&path), (true, Err(ValidationError::Empty)));

        std::fs::write(&path, "{invalid").unwrap();
        assert!(matches!(validate_file(&path), (true, Err(ValidationError::Malformed(_)))));

        std::fs::write(&path, "42").unwrap();
        assert_eq!(validate_file(&path), (true, Err(ValidationError::WrongType)));

        std::fs::write(&path, [0xff, 0xfe, b'{']).unwrap();
        assert_eq!(
            validate_file(&path),
            (true, Err(ValidationError::Malformed("Malformed UTF-8 characters".into())))
        );

        std::fs::write(&path, "[1,2]").unwrap();
        assert_eq!(validate_file(&path), (true, Ok(())));
    }

    #[test]
    fn test_write_json_file_minified_and_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep").join("x.json");
        let long = json!({"padding": "x".repeat(100)});
        write_json_file(&path, &long).unwrap();
        let bytes = write_json_file(&path, &json!({"a": 1, "url": "https://e.com/p"})).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"a\":1,\"url\":\"https://e.com/p\"}");
        assert_eq!(bytes, content.len());
    }

    #[test]
    fn test_valid_file_untouched() {
        let f = fixture(FakeSource::new());
        let path = write(&f, "globalsetting.json", "{\"ok\":true}");
        let result = f.checker.check_file(&path, "globalsetting.json", "global_settings");
        assert!(result.valid);
        assert!(result.exists);
        assert!(result.error.is_none());
        assert!(!result.repaired);
        assert!(f.source.calls().is_empty());
        assert!(f.logger.store().all().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_file_repaired() {
        let f = fixture(FakeSource::new().ok("global_settings", json!({"a": 1})));
        let path = write(&f, "globalsetting.json", "{invalid");

        let result = f.checker.check_file(&path, "globalsetting.json", "global_settings");
        assert!(result.exists);
        assert!(result.valid);
        assert!(result.repaired);
        assert!(result.error.is_some());
        assert!(result.repair_error.is_none());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        assert_eq!(f.source.calls(), vec!["global_settings".to_string()]);

        let records = f.logger.store().all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].log_type, LogType::Success);
        assert_eq!(records[0].message, "Cached JSON file repaired: globalsetting.json");
        assert_eq!(records[1].log_type, LogType::Warning);
        assert_eq!(records[1].message, "Cached JSON file error detected: globalsetting.json");

        let posts = f.recorder.posts();
        assert!(posts.iter().any(|(_, p)| p["blocks"][0]["text"]["text"]
            == "⚠️ JSON File Invalid - Auto Fixed"));
        assert!(posts
            .iter()
            .any(|(_, p)| p["text"].as_str().unwrap_or("").starts_with("[Faultline] SUCCESS")));
    }

    #[test]
    fn test_unreadable_file_triggers_repair() {
        let f = fixture(FakeSource::new().ok("microsites", json!({"sites": []})));
        let path = f.checker.cache_dir().join("globalmicrosites.json");
        std::fs::create_dir_all(&path).unwrap();
        assert_eq!(validate_file(&path), (true, Err(ValidationError::Unreadable)));

        let result = f.checker.check_file(&path, "globalmicrosites.json", "microsites");
        assert!(result.exists);
        assert_eq!(result.error.as_deref(), Some("Failed to read file"));
        assert_eq!(f.source.calls(), vec!["microsites".to_string()]);
        // The path is a directory, so the rewrite fails too
        assert!(!result.repaired);
        assert!(result.repair_error.is_some());

        let records = f.logger.store().all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].log_type, LogType::Error);
        assert_eq!(records[1].message, "Cached JSON file error detected: globalmicrosites.json");
    }

    #[test]
    fn test_fetch_failure_leaves_file_unchanged() {
        let f = fixture(FakeSource::new().status("services", 500));
        let path = write(&f, "globalservices.json", "{broken");

        let result = f.checker.check_file(&path, "globalservices.json", "services");
        assert!(!result.valid);
        assert!(!result.repaired);
        assert_eq!(
            result.repair_error.as_deref(),
            Some("API returned status code 500: Internal Server Error")
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{broken");

        let posts = f.recorder.posts();
        let failure = posts
            .iter()
            .find(|(_, p)| p["icon_emoji"] == ":rotating_light:")
            .map(|(_, p)| p.clone())
            .unwrap();
        assert_eq!(
            failure["text"],
            "🚨 CRITICAL: globalservices.json is invalid and repair FAILED!"
        );
        assert_eq!(
            failure["blocks"][3]["fields"][1]["text"],
            "*Repair Error:*\nAPI returned status code 500: Internal Server Error"
        );

        let records = f.logger.store().all().unwrap();
        assert_eq!(records[0].log_type, LogType::Error);
        assert_eq!(records[0].message, "Failed to repair cached JSON file: globalservices.json");
    }

    #[test]
    fn test_missing_file_created_with_directory() {
        let f = fixture(FakeSource::new().ok("microsites", json!([{"id": 1}])));
        let result = f.checker.check_specific_file("globalmicrosites.json").unwrap();
        assert!(!result.exists);
        assert_eq!(result.error.as_deref(), Some("File does not exist"));
        assert!(result.repaired);
        assert_eq!(
            std::fs::read_to_string(f.checker.cache_dir().join("globalmicrosites.json")).unwrap(),
            "[{\"id\":1}]"
        );
    }

    #[test]
    fn test_check_specific_file_unknown() {
        let f = fixture(FakeSource::new());
        assert!(matches!(
            f.checker.check_specific_file("other.json"),
            Err(CoreError::UnknownFile(_))
        ));
    }

    #[test]
    fn test_repeated_failures_all_logged() {
        let f = fixture(FakeSource::new().status("services", 503));
        let path = write(&f, "globalservices.json", "");
        f.checker.check_file(&path, "globalservices.json", "services");
        f.checker.check_file(&path, "globalservices.json", "services");
        assert_eq!(f.logger.store().all().unwrap().len(), 4);
    }

    #[test]
    fn test_check_all_counts() {
        let f = fixture(
            FakeSource::new()
                .ok("seo_global_settings", json!({"title": "x"}))
                .status("services", 500),
        );
        write(&f, "globalsetting.json", "{\"ok\":1}");
        write(&f, "seoglobalsetting.json", "\"scalar\"");
        write(&f, "globalservices.json", "{");
        // globalmicrosites.json missing and its handle unknown to the fake

        let batch = f.checker.check_all();
        assert_eq!(batch.checked, 4);
        assert_eq!(batch.valid, 1);
        assert_eq!(batch.invalid, 3);
        assert_eq!(batch.repaired, 1);
        assert_eq!(batch.failed, 2);
        assert_eq!(batch.details.len(), 4);
        assert!(batch.details["seoglobalsetting.json"].repaired);
        assert!(batch.details["globalmicrosites.json"]
            .repair_error
            .as_deref()
            .unwrap()
            .contains("not configured"));
    }

    #[test]
    fn test_file_map_accessor() {
        let f = fixture(FakeSource::new());
        let map = f.checker.file_map();
        assert_eq!(map.len(), 4);
        assert_eq!(map[0].filename, "globalsetting.json");
        assert_eq!(map[0].remote_handle, "global_settings");
        assert_eq!(map[0].path, f.checker.cache_dir().join("globalsetting.json"));
    }

    #[test]
    fn test_repaired_chat_message_shape() {
        let mut config = Config::default();
        config.notify.site_name = "Demo".into();
        config.notify.site_url = "https://demo.example.com".into();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let msg = repaired_chat_message(&config, "a.json", "Syntax error", at);
        assert_eq!(msg["username"], "Faultline JSON Checker");
        assert_eq!(msg["blocks"].as_array().unwrap().len(), 6);
        assert_eq!(msg["blocks"][2]["type"], "divider");
        assert_eq!(msg["blocks"][4]["fields"][1]["text"], "*Time:*\n2024-01-01 12:00:00");
        assert_eq!(
            msg["blocks"][5]["elements"][0]["text"],
            "🔧 Faultline JSON Checker | https://demo.example.com"
        );
    }

    #[test]
    fn test_api_url_requires_base() {
        let client = ApiClient::new("", "", Duration::from_secs(1));
        assert!(matches!(client.url_for("x"), Err(FetchError::NotConfigured)));
        assert!(matches!(client.fetch("x"), Err(FetchError::NotConfigured)));

        let client = ApiClient::new("https://cms.example.com/api/", "", Duration::from_secs(1));
        assert_eq!(
            client.url_for("services").unwrap(),
            "https://cms.example.com/api/global-sets/services"
        );
    }

    /// Accept one connection, capture the request head, reply with `status` and `body`
    fn one_shot_server(
        status: u16,
        body: &'static str,
    ) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                head.push_str(&line);
            }
            let response = format!(
                "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            head
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn test_api_client_success_sends_headers() {
        let (base, server) = one_shot_server(200, "{\"title\":\"Home\"}");
        let client = ApiClient::new(base, "secret-token", Duration::from_secs(5));
        let data = client.fetch("global_settings").unwrap();
        assert_eq!(data, json!({"title": "Home"}));

        let head = server.join().unwrap().to_lowercase();
        assert!(head.starts_with("get /global-sets/global_settings "));
        assert!(head.contains("accept: application/json"));
        assert!(head.contains("authorization: bearer secret-token"));
    }

    #[test]
    fn test_api_client_non_200_truncates_body() {
        static BODY: &str = concat!(
            "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
            "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
            "yyyyyyyyyy"
        );
        let (base, server) = one_shot_server(503, BODY);
        let client = ApiClient::new(base, "", Duration::from_secs(5));
        match client.fetch("services") {
            Err(FetchError::Status { status, excerpt }) => {
                assert_eq!(status, 503);
                assert_eq!(excerpt.len(), 200);
                assert!(!excerpt.contains('y'));
            }
            other => panic!("unexpected: {other:?}"),
        }
        let head = server.join().unwrap().to_lowercase();
        assert!(!head.contains("authorization"));
    }

    #[test]
    fn test_api_client_rejects_non_json_and_scalars() {
        let (base, server) = one_shot_server(200, "<html>");
        let client = ApiClient::new(base, "", Duration::from_secs(5));
        assert!(matches!(client.fetch("x"), Err(FetchError::Parse(_))));
        server.join().unwrap();

        let (base, server) = one_shot_server(200, "true");
        let client = ApiClient::new(base, "", Duration::from_secs(5));
        assert!(matches!(client.fetch("x"), Err(FetchError::UnexpectedShape)));
        server.join().unwrap();
    }
}
