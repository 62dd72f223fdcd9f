//! Logging facade for Faultline
//!
//! Single entry point for recording an event: coerce the type, sanitize the
//! context, enrich the message, gate on deduplication, persist, append to the
//! file sink, notify observers and dispatch notifications. Nothing in here
//! returns an error to the caller.

use crate::config::Config;
use crate::dedup::{fingerprint, Deduplicator};
use crate::event::{LogType, NewRecord, RawEvent};
use crate::hooks::Hooks;
use crate::notify::{Channel, Notifier, SendResult};
use crate::sanitize::{is_empty_context, Context, ContextSanitizer};
use crate::sqlite_storage::LogStore;
use crate::storage::{FileSink, SinkEntry};
use crate::types::Clock;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Id returned when nothing was stored
pub const NO_RECORD: i64 = 0;

/// A log call with every option spelled out
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Raw type name, coerced into the registered set
    pub log_type: String,
    pub message: String,
    pub context: Context,
    /// Force a chat alert regardless of the type policy
    pub alert: bool,
    /// Gate on the deduplicator
    pub dedup: bool,
    /// Extra fingerprint discriminator (adapter kind, error code)
    pub discriminator: String,
    /// Source location for the fingerprint; taken from the context when unset
    pub location: Option<(String, u32)>,
}

impl LogEntry {
    pub fn new(log_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            log_type: log_type.into(),
            message: message.into(),
            context: Context::Empty,
            alert: false,
            dedup: true,
            discriminator: String::new(),
            location: None,
        }
    }

    pub fn context(mut self, context: impl Into<Context>) -> Self {
        self.context = context.into();
        self
    }

    pub fn alert(mut self, alert: bool) -> Self {
        self.alert = alert;
        self
    }

    /// Record every occurrence
    pub fn without_dedup(mut self) -> Self {
        self.dedup = false;
        self
    }

    pub fn discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = discriminator.into();
        self
    }

    pub fn location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.location = Some((file.into(), line));
        self
    }
}

impl From<RawEvent> for LogEntry {
    fn from(event: RawEvent) -> Self {
        let discriminator = if event.extra.is_empty() {
            event.kind.to_string()
        } else {
            format!("{}:{}", event.kind, event.extra)
        };
        LogEntry::new(event.log_type.as_str(), event.message)
            .context(event.context)
            .discriminator(discriminator)
            .location(event.file, event.line)
    }
}

/// What happened to a log call
#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome {
    Stored(i64),
    /// Repeat within the dedup window
    Suppressed,
    /// The store write failed; sink, observers and notifications still ran
    Failed,
}

impl LogOutcome {
    /// Record id, or [`NO_RECORD`]
    pub fn id(&self) -> i64 {
        match self {
            LogOutcome::Stored(id) => *id,
            LogOutcome::Suppressed | LogOutcome::Failed => NO_RECORD,
        }
    }
}

/// The logging pipeline
pub struct Logger {
    config: Arc<Config>,
    hooks: Arc<Hooks>,
    store: Arc<LogStore>,
    dedup: Deduplicator,
    notifier: Arc<Notifier>,
    sink: Option<FileSink>,
    sanitizer: ContextSanitizer,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("store", &self.store.path())
            .field("dedup", &self.dedup)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

impl Logger {
    pub fn new(
        config: Arc<Config>,
        hooks: Arc<Hooks>,
        store: Arc<LogStore>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dedup = Deduplicator::new(
            store.clone(),
            clock.clone(),
            config.logging.dedup_window(),
        );
        let sink = if config.logging.enable_file_logging {
            match config.logging.effective_log_dir() {
                Ok(dir) => Some(FileSink::new(dir)),
                Err(e) => {
                    warn!(error = %e, "file logging disabled: no log directory");
                    None
                }
            }
        } else {
            None
        };
        let sanitizer = ContextSanitizer::new(hooks.sensitive_keys().to_vec());

        Self {
            config,
            hooks,
            store,
            dedup,
            notifier,
            sink,
            sanitizer,
            clock,
        }
    }

    /// Record an event. Returns the record id, or [`NO_RECORD`] when the
    /// event was suppressed or could not be stored.
    pub fn log(
        &self,
        log_type: &str,
        message: &str,
        context: impl Into<Context>,
        alert: bool,
    ) -> i64 {
        self.record(LogEntry::new(log_type, message).context(context).alert(alert))
            .id()
    }

    pub fn log_error(&self, message: &str, context: impl Into<Context>) -> i64 {
        self.log("error", message, context, false)
    }

    pub fn log_warning(&self, message: &str, context: impl Into<Context>) -> i64 {
        self.log("warning", message, context, false)
    }

    pub fn log_info(&self, message: &str, context: impl Into<Context>) -> i64 {
        self.log("info", message, context, false)
    }

    pub fn log_success(&self, message: &str, context: impl Into<Context>) -> i64 {
        self.log("success", message, context, false)
    }

    /// Record a normalized event from a capture adapter
    pub fn log_event(&self, event: RawEvent) -> LogOutcome {
        self.record(event.into())
    }

    /// Run the full pipeline for one entry
    pub fn record(&self, entry: LogEntry) -> LogOutcome {
        let log_type = LogType::coerce(&entry.log_type, self.hooks.log_types());

        let context = self.sanitizer.sanitize(entry.context);
        let context = self.hooks.transform_context(context);

        let location = extract_file_context(&context);
        let message = augment_message(&entry.message, location.as_ref());
        let message = strip_tags(&message);

        if entry.dedup {
            let (file, line) = entry.location.or(location).unwrap_or_default();
            let fp = fingerprint(log_type.as_str(), &message, &file, line, &entry.discriminator);
            if self.dedup.is_duplicate(&fp) {
                debug!(log_type = %log_type, fingerprint = %fp, "duplicate event suppressed");
                return LogOutcome::Suppressed;
            }
        }

        let now = self.clock.now();
        let context_json = if is_empty_context(&context) {
            None
        } else {
            serde_json::to_string(&context).ok()
        };
        let new_record = NewRecord {
            log_type: log_type.clone(),
            message: message.clone(),
            context: context_json,
        };

        let outcome = match self.store.insert(&new_record, now) {
            Ok(id) => LogOutcome::Stored(id),
            Err(e) => {
                warn!(error = %e, log_type = %log_type, "failed to store log record");
                LogOutcome::Failed
            }
        };

        if let Some(ref sink) = self.sink {
            let day = now.date_naive();
            let path = self
                .hooks
                .file_log_override(sink.log_dir(), day)
                .unwrap_or_else(|| sink.default_path(day));
            let line = SinkEntry::new(now, log_type.as_str(), &message, &context);
            if let Err(e) = sink.append(&path, &line) {
                warn!(error = %e, path = %path.display(), "failed to append to log file");
            }
        }

        self.hooks.notify_observers(&log_type, &message, &context, outcome.id());

        self.notify(&log_type, &message, &context, entry.alert);

        outcome
    }

    fn notify(
        &self,
        log_type: &LogType,
        message: &str,
        context: &Value,
        alert: bool,
    ) -> Vec<(Channel, SendResult)> {
        self.notifier.maybe_notify(
            &self.config,
            &self.hooks,
            log_type,
            message,
            context,
            alert,
            self.clock.now(),
        )
    }

    /// Start a new processing session (clears the in-memory dedup tier)
    pub fn reset_session(&self) {
        self.dedup.reset_session();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

fn script_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<script[^>]*?>.*?</script>").expect("valid regex"))
}

fn style_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<style[^>]*?>.*?</style>").expect("valid regex"))
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"))
}

/// Remove markup, including script and style bodies
pub fn strip_tags(input: &str) -> String {
    let without_scripts = script_pattern().replace_all(input, "");
    let without_styles = style_pattern().replace_all(&without_scripts, "");
    tag_pattern()
        .replace_all(&without_styles, "")
        .trim()
        .to_string()
}

/// First `file` (and its sibling `line`) found in the context, depth-first
pub fn extract_file_context(context: &Value) -> Option<(String, u32)> {
    match context {
        Value::Object(map) => {
            if let Some(file) = map.get("file") {
                let line = map.get("line").map(int_value).unwrap_or(0);
                return Some((scalar_string(file), line.clamp(0, u32::MAX as i64) as u32));
            }
            map.values()
                .filter(|v| v.is_object() || v.is_array())
                .find_map(extract_file_context)
        }
        Value::Array(items) => items
            .iter()
            .filter(|v| v.is_object() || v.is_array())
            .find_map(extract_file_context),
        _ => None,
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "1".to_string(),
        _ => String::new(),
    }
}

/// Integer reading of a JSON value: numbers truncate, strings use their
/// leading digits
fn int_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => {
            let trimmed = s.trim_start();
            let (sign, digits) = match trimmed.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
        }
        Value::Bool(true) => 1,
        _ => 0,
    }
}

/// Append ` (in file:line)` unless the message already names the file
pub fn augment_message(message: &str, location: Option<&(String, u32)>) -> String {
    let Some((file, line)) = location else {
        return message.to_string();
    };
    if file.is_empty() {
        return message.to_string();
    }
    let suffix = if *line > 0 {
        format!(" (in {file}:{line})")
    } else {
        format!(" (in {file})")
    };
    if message.contains(&suffix) || message.contains(file.as_str()) {
        return message.to_string();
    }
    format!("{message}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingTransport;
    use crate::sanitize::StructuredError;
    use crate::types::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        logger: Logger,
        clock: Arc<ManualClock>,
        recorder: Arc<RecordingTransport>,
    }

    fn fixture_with(config: Config, hooks: Hooks) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let recorder = Arc::new(RecordingTransport::new());
        let notifier = Arc::new(Notifier::new(recorder.clone(), recorder.clone()));
        let logger = Logger::new(
            Arc::new(config),
            Arc::new(hooks),
            Arc::new(LogStore::in_memory().unwrap()),
            notifier,
            clock.clone(),
        );
        Fixture {
            logger,
            clock,
            recorder,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Config::default(), Hooks::new())
    }

    #[test]
    fn test_log_stores_record() {
        let f = fixture();
        let id = f.logger.log_info("user signed in", json!({"user": 7}));
        assert!(id > 0);

        let record = f.logger.store().get(id).unwrap().unwrap();
        assert_eq!(record.log_type, LogType::Info);
        assert_eq!(record.message, "user signed in");
        assert_eq!(record.context.as_deref(), Some("{\"user\":7}"));
        assert_eq!(record.created_at, f.clock.now());
    }

    #[test]
    fn test_unknown_type_coerced_to_info() {
        let f = fixture();
        let id = f.logger.log("critical", "x", (), false);
        let record = f.logger.store().get(id).unwrap().unwrap();
        assert_eq!(record.log_type, LogType::Info);
    }

    #[test]
    fn test_registered_custom_type_kept() {
        let f = fixture_with(Config::default(), Hooks::new().register_log_type("audit"));
        let id = f.logger.log("AUDIT", "x", (), false);
        let record = f.logger.store().get(id).unwrap().unwrap();
        assert_eq!(record.log_type, LogType::Custom("audit".into()));
    }

    #[test]
    fn test_empty_context_stored_as_null() {
        let f = fixture();
        let id = f.logger.log_info("x", ());
        assert!(f.logger.store().get(id).unwrap().unwrap().context.is_none());
    }

    #[test]
    fn test_scalar_context_wrapped() {
        let f = fixture();
        let id = f.logger.log_info("x", json!(42));
        let record = f.logger.store().get(id).unwrap().unwrap();
        assert_eq!(record.context_value(), Some(json!({"value": "42"})));
    }

    #[test]
    fn test_structured_error_context() {
        let f = fixture();
        let error = StructuredError::new("http_request_failed", "timeout");
        let id = f.logger.log_error("request failed", error);
        let ctx = f.logger.store().get(id).unwrap().unwrap().context_value().unwrap();
        assert_eq!(ctx["code"], "http_request_failed");
        assert_eq!(ctx["all"]["http_request_failed"][0], "timeout");
    }

    #[test]
    fn test_sensitive_values_redacted() {
        let f = fixture();
        let id = f.logger.log_error(
            "login failed",
            json!({"user": "a", "nested": {"Password": "hunter2"}, "header": "Bearer abc.def"}),
        );
        let raw = f.logger.store().get(id).unwrap().unwrap().context.unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(!raw.contains("abc.def"));
        assert!(raw.contains("[REDACTED]"));
    }

    #[test]
    fn test_message_augmented_with_location() {
        let f = fixture();
        let id = f.logger.log_error(
            "Undefined variable",
            json!({"error": {"file": "/srv/app/index.php", "line": "12"}}),
        );
        let record = f.logger.store().get(id).unwrap().unwrap();
        assert_eq!(record.message, "Undefined variable (in /srv/app/index.php:12)");
    }

    #[test]
    fn test_message_not_augmented_when_file_mentioned() {
        assert_eq!(
            augment_message("boom in /a.rs", Some(&("/a.rs".to_string(), 3))),
            "boom in /a.rs"
        );
        assert_eq!(
            augment_message("boom", Some(&("/a.rs".to_string(), 0))),
            "boom (in /a.rs)"
        );
        assert_eq!(augment_message("boom", None), "boom");
    }

    #[test]
    fn test_markup_stripped() {
        let f = fixture();
        let id = f
            .logger
            .log_warning("<b>Bad</b> input<script>alert(1)</script><style>p{}</style>", ());
        let record = f.logger.store().get(id).unwrap().unwrap();
        assert_eq!(record.message, "Bad input");
    }

    #[test]
    fn test_extract_file_context_first_match() {
        let ctx = json!({"a": [{"b": 1}, {"file": "x.rs", "line": 3.9}], "c": {"file": "y.rs"}});
        assert_eq!(extract_file_context(&ctx), Some(("x.rs".to_string(), 3)));
        assert_eq!(extract_file_context(&json!({"line": 1})), None);
        assert_eq!(
            extract_file_context(&json!({"file": "z", "line": -4})),
            Some(("z".to_string(), 0))
        );
    }

    #[test]
    fn test_dedup_within_window_then_after() {
        let mut config = Config::default();
        config.logging.dedup_period_hours = 1;
        let f = fixture_with(config, Hooks::new());

        assert!(f.logger.log_error("X", json!({"k": 1})) > 0);
        f.clock.advance(Duration::minutes(30));
        assert_eq!(f.logger.log_error("X", json!({"k": 1})), NO_RECORD);
        assert_eq!(f.logger.store().all().unwrap().len(), 1);

        f.clock.advance(Duration::hours(25));
        assert!(f.logger.log_error("X", json!({"k": 1})) > 0);
        assert_eq!(f.logger.store().all().unwrap().len(), 2);
    }

    #[test]
    fn test_dedup_disabled_window_uses_session_only() {
        let mut config = Config::default();
        config.logging.dedup_period_hours = 0;
        let f = fixture_with(config, Hooks::new());

        assert!(f.logger.log_error("X", ()) > 0);
        assert_eq!(f.logger.log_error("X", ()), NO_RECORD);
        f.logger.reset_session();
        assert!(f.logger.log_error("X", ()) > 0);
        assert_eq!(f.logger.store().all().unwrap().len(), 2);
    }

    #[test]
    fn test_without_dedup_records_every_call() {
        let f = fixture();
        for _ in 0..3 {
            let outcome = f.logger.record(LogEntry::new("warning", "same").without_dedup());
            assert!(matches!(outcome, LogOutcome::Stored(_)));
        }
        assert_eq!(f.logger.store().all().unwrap().len(), 3);
    }

    #[test]
    fn test_raw_event_location_and_kind_in_fingerprint() {
        let f = fixture();
        let first = RawEvent::new("runtime_error", LogType::Warning, "Undefined index")
            .location("/app/a.php", 10)
            .extra(2);
        assert!(matches!(f.logger.log_event(first.clone()), LogOutcome::Stored(_)));
        assert_eq!(f.logger.log_event(first.clone()), LogOutcome::Suppressed);

        let other_line = first.clone().location("/app/a.php", 11);
        assert!(matches!(f.logger.log_event(other_line), LogOutcome::Stored(_)));

        let mut other_kind = first;
        other_kind.kind = "exception";
        assert!(matches!(f.logger.log_event(other_kind), LogOutcome::Stored(_)));
    }

    #[test]
    fn test_observer_receives_record_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hooks = Hooks::new().on_log_added(move |t, m, _, id| {
            sink.lock().unwrap().push((t.to_string(), m.to_string(), id));
        });
        let f = fixture_with(Config::default(), hooks);
        let id = f.logger.log_success("deployed", ());
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[("success".to_string(), "deployed".to_string(), id)]
        );
    }

    #[test]
    fn test_context_transform_applied_before_store() {
        let hooks = Hooks::new().on_context(|mut v| {
            v["env"] = json!("prod");
            v
        });
        let f = fixture_with(Config::default(), hooks);
        let id = f.logger.log_info("x", json!({"a": 1}));
        let ctx = f.logger.store().get(id).unwrap().unwrap().context_value().unwrap();
        assert_eq!(ctx, json!({"a": 1, "env": "prod"}));
    }

    #[test]
    fn test_alert_reaches_chat() {
        let mut config = Config::default();
        config.notify.slack_webhook_url = "https://hooks.example.com/chat".into();
        let f = fixture_with(config, Hooks::new());
        f.logger.log("info", "heads up", (), true);
        f.logger.log("info", "quiet", (), false);
        let posts = f.recorder.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1["text"], "[Faultline] INFO: heads up");
    }

    #[test]
    fn test_file_sink_when_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.logging.enable_file_logging = true;
        config.logging.log_dir = Some(temp_dir.path().to_path_buf());
        let f = fixture_with(config, Hooks::new());

        f.logger.log_error("disk full", json!({"mount": "/var"}));
        let content = std::fs::read_to_string(temp_dir.path().join("2024-01-01.log")).unwrap();
        let line: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(line["type"], "error");
        assert_eq!(line["message"], "disk full");
        assert_eq!(line["context"]["mount"], "/var");
        assert_eq!(line["ts"], "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_file_sink_path_override() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.logging.enable_file_logging = true;
        config.logging.log_dir = Some(temp_dir.path().to_path_buf());
        let hooks = Hooks::new().file_log_path(|dir, _| dir.join("custom").join("all.log"));
        let f = fixture_with(config, hooks);

        f.logger.log_info("x", ());
        assert!(temp_dir.path().join("custom").join("all.log").exists());
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("  <p>Hello <em>world</em></p> "), "Hello world");
        assert_eq!(strip_tags("a < b"), "a < b");
    }

    #[test]
    fn test_int_value_php_style() {
        assert_eq!(int_value(&json!("42abc")), 42);
        assert_eq!(int_value(&json!("-7")), -7);
        assert_eq!(int_value(&json!("abc")), 0);
        assert_eq!(int_value(&json!(true)), 1);
        assert_eq!(int_value(&json!(null)), 0);
    }
}
