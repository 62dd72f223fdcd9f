//! Extension points
//!
//! Typed callback registry held by the service object. Each seam is invoked
//! synchronously at a fixed point of the pipeline.

use crate::config::Config;
use crate::event::{LogType, DEFAULT_LOG_TYPES};
use crate::sanitize::DEFAULT_SENSITIVE_KEYS;
use chrono::NaiveDate;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Transforms the sanitized context before it is stored
pub type ContextTransform = Box<dyn Fn(Value) -> Value + Send + Sync>;
/// Overrides the notify decision: `(should, type, message, context, config) -> should`
pub type NotifyDecision = Box<dyn Fn(bool, &LogType, &str, &Value, &Config) -> bool + Send + Sync>;
/// Transforms the generic webhook payload before it is sent
pub type PayloadTransform = Box<dyn Fn(Value, &LogType, &str, &Value) -> Value + Send + Sync>;
/// Observes every stored record: `(type, message, context, record_id)`
pub type LogObserver = Box<dyn Fn(&LogType, &str, &Value, i64) + Send + Sync>;
/// Chooses the sink file for a day, given the configured directory
pub type FileLogPath = Box<dyn Fn(&Path, NaiveDate) -> PathBuf + Send + Sync>;

/// Registered extension callbacks
pub struct Hooks {
    log_types: Vec<String>,
    sensitive_keys: Vec<String>,
    context_transforms: Vec<ContextTransform>,
    notify_decision: Option<NotifyDecision>,
    payload_transforms: Vec<PayloadTransform>,
    observers: Vec<LogObserver>,
    file_log_path: Option<FileLogPath>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            log_types: DEFAULT_LOG_TYPES.iter().map(|s| s.to_string()).collect(),
            sensitive_keys: DEFAULT_SENSITIVE_KEYS.iter().map(|s| s.to_string()).collect(),
            context_transforms: Vec::new(),
            notify_decision: None,
            payload_transforms: Vec::new(),
            observers: Vec::new(),
            file_log_path: None,
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("log_types", &self.log_types)
            .field("sensitive_keys", &self.sensitive_keys.len())
            .field("context_transforms", &self.context_transforms.len())
            .field("notify_decision", &self.notify_decision.is_some())
            .field("payload_transforms", &self.payload_transforms.len())
            .field("observers", &self.observers.len())
            .field("file_log_path", &self.file_log_path.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow an additional log type
    pub fn register_log_type(mut self, name: &str) -> Self {
        let name = name.trim().to_lowercase();
        if !name.is_empty() && !self.log_types.contains(&name) {
            self.log_types.push(name);
        }
        self
    }

    /// Redact values under keys containing `fragment` as well
    pub fn register_sensitive_key(mut self, fragment: &str) -> Self {
        let fragment = fragment.trim().to_lowercase();
        if !fragment.is_empty() && !self.sensitive_keys.contains(&fragment) {
            self.sensitive_keys.push(fragment);
        }
        self
    }

    pub fn on_context(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.context_transforms.push(Box::new(f));
        self
    }

    pub fn notify_decision(
        mut self,
        f: impl Fn(bool, &LogType, &str, &Value, &Config) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.notify_decision = Some(Box::new(f));
        self
    }

    pub fn on_payload(
        mut self,
        f: impl Fn(Value, &LogType, &str, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.payload_transforms.push(Box::new(f));
        self
    }

    pub fn on_log_added(
        mut self,
        f: impl Fn(&LogType, &str, &Value, i64) + Send + Sync + 'static,
    ) -> Self {
        self.observers.push(Box::new(f));
        self
    }

    pub fn file_log_path(
        mut self,
        f: impl Fn(&Path, NaiveDate) -> PathBuf + Send + Sync + 'static,
    ) -> Self {
        self.file_log_path = Some(Box::new(f));
        self
    }

    pub fn log_types(&self) -> &[String] {
        &self.log_types
    }

    pub fn sensitive_keys(&self) -> &[String] {
        &self.sensitive_keys
    }

    pub(crate) fn transform_context(&self, context: Value) -> Value {
        self.context_transforms
            .iter()
            .fold(context, |ctx, transform| transform(ctx))
    }

    pub(crate) fn decide_notify(
        &self,
        should: bool,
        log_type: &LogType,
        message: &str,
        context: &Value,
        config: &Config,
    ) -> bool {
        match &self.notify_decision {
            Some(decide) => decide(should, log_type, message, context, config),
            None => should,
        }
    }

    pub(crate) fn transform_payload(
        &self,
        payload: Value,
        log_type: &LogType,
        message: &str,
        context: &Value,
    ) -> Value {
        self.payload_transforms
            .iter()
            .fold(payload, |p, transform| transform(p, log_type, message, context))
    }

    pub(crate) fn notify_observers(
        &self,
        log_type: &LogType,
        message: &str,
        context: &Value,
        id: i64,
    ) {
        for observer in &self.observers {
            observer(log_type, message, context, id);
        }
    }

    /// Sink file for `day` chosen by the host, if it registered one
    pub(crate) fn file_log_override(&self, dir: &Path, day: NaiveDate) -> Option<PathBuf> {
        self.file_log_path.as_ref().map(|resolve| resolve(dir, day))
    }
}
