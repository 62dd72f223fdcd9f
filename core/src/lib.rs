//! Faultline Core Library
//!
//! Application error and event logging with a cached JSON integrity checker.
//!
//! # Features
//!
//! - **Event Logging**: Sanitized, deduplicated records in SQLite with optional JSON-lines files
//! - **Notifications**: Chat webhook, generic webhook and email alerts per log type
//! - **Capture Adapters**: Runtime errors, panics, HTTP failures, host errors and cron failures
//! - **JSON Checker**: Validates cached JSON files and resyncs broken ones from the remote API
//!
//! # Example
//!
//! ```no_run
//! use faultline_core::{Config, Hooks, Service};
//!
//! let service = Service::open(Config::load()?, Hooks::new())?;
//! service.logger().log_error("Payment failed", serde_json::json!({ "order": 42 }));
//! # Ok::<(), faultline_core::CoreError>(())
//! ```

pub mod capture;
pub mod checker;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod format;
pub mod hooks;
pub mod logger;
pub mod notify;
pub mod retention;
pub mod sanitize;
pub mod schedule;
pub mod service;
pub mod sqlite_storage;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use capture::{
    install_panic_hook, Capture, CaptureContext, CaptureSource, HttpSignal, PanicSignal,
    RuntimeErrorSignal, Severity, ShutdownSignal,
};
pub use checker::{
    ApiClient, BatchCheckResult, CheckResult, GlobalSetSource, JsonChecker, FILE_HANDLE_MAP,
};
pub use config::{CaptureConfig, CheckerConfig, Config, LoggingConfig, NotifyConfig};
pub use dedup::{fingerprint, DedupStore, Deduplicator, MemoryDedupStore};
pub use error::{CoreError, Result};
pub use event::{LogRecord, LogType, RawEvent, DEFAULT_LOG_TYPES};
pub use format::{FormatterConfig, OutputFormat, RecordFormatter};
pub use hooks::Hooks;
pub use logger::{LogEntry, LogOutcome, Logger, NO_RECORD};
pub use notify::{Channel, Notifier, SendResult};
pub use retention::PurgeReport;
pub use sanitize::{Context, ContextSanitizer, StructuredError};
pub use schedule::Job;
pub use service::{ExportFormat, Principal, Service, ServiceParts, Trigger, TriggerOutcome};
pub use sqlite_storage::{LogQuery, LogStore};
pub use storage::{cleanup_old_logs, FileSink};
pub use types::{Clock, ManualClock, SystemClock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
