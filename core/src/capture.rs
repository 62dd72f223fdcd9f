//! Event capture adapters
//!
//! Small translators from host signals (runtime errors, panics, fatal
//! shutdowns, outbound HTTP failures, host error objects, scheduler
//! failures) to [`RawEvent`]s handed to the logging facade. Only registered
//! sources are translated.
//!
//! Every adapter takes a [`CaptureContext`]: an error raised while an error
//! is being logged in the same context is dropped instead of recursing.

use crate::config::CaptureConfig;
use crate::event::{LogType, RawEvent};
use crate::logger::{LogOutcome, Logger};
use crate::sanitize::StructuredError;
use serde_json::{json, Value};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::Cell;
use std::collections::HashSet;
use std::panic::Location;
use std::sync::Arc;

/// Characters of an HTTP response body kept in the context
const BODY_EXCERPT_LEN: usize = 512;

/// A host signal family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureSource {
    RuntimeErrors,
    Panics,
    ShutdownFatal,
    HttpFailures,
    HostErrors,
    CronFailures,
}

impl CaptureSource {
    pub const ALL: [CaptureSource; 6] = [
        CaptureSource::RuntimeErrors,
        CaptureSource::Panics,
        CaptureSource::ShutdownFatal,
        CaptureSource::HttpFailures,
        CaptureSource::HostErrors,
        CaptureSource::CronFailures,
    ];

    pub fn enabled_in(&self, config: &CaptureConfig) -> bool {
        match self {
            CaptureSource::RuntimeErrors => config.runtime_errors,
            CaptureSource::Panics => config.panics,
            CaptureSource::ShutdownFatal => config.shutdown_fatal,
            CaptureSource::HttpFailures => config.http_failures,
            CaptureSource::HostErrors => config.host_errors,
            CaptureSource::CronFailures => config.cron_failures,
        }
    }
}

/// Severity of a runtime error signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Unrecoverable; the process is going down
    Fatal,
    Error,
    Warning,
    Notice,
    Deprecation,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Deprecation => "deprecation",
        }
    }

    /// Log type a runtime error of this severity is stored as
    pub fn log_type(&self) -> LogType {
        match self {
            Severity::Fatal | Severity::Error => LogType::Error,
            Severity::Warning => LogType::Warning,
            Severity::Notice | Severity::Deprecation => LogType::Info,
        }
    }
}

/// Non-fatal runtime error
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeErrorSignal {
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub line: u32,
}

/// Error left behind by a process that is shutting down
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownSignal {
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub line: u32,
}

/// Unhandled panic
#[derive(Debug, Clone, PartialEq)]
pub struct PanicSignal {
    pub message: String,
    pub file: String,
    pub line: u32,
    pub trace: Option<String>,
}

impl PanicSignal {
    /// Build from the pieces a panic hook receives
    pub fn from_parts(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        let backtrace = Backtrace::capture();
        let trace = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        Self {
            message,
            file: location.map(|l| l.file().to_string()).unwrap_or_default(),
            line: location.map(|l| l.line()).unwrap_or(0),
            trace,
        }
    }
}

/// Outcome of an outbound HTTP request
#[derive(Debug, Clone, PartialEq)]
pub enum HttpSignal {
    /// The request never produced a response
    Failed {
        url: String,
        request: Value,
        error: StructuredError,
    },
    Response {
        url: String,
        status: u16,
        headers: Value,
        body: String,
    },
}

/// Re-entrancy state of one execution context. Not shared between threads.
#[derive(Debug, Default)]
pub struct CaptureContext {
    handling: Cell<bool>,
}

impl CaptureContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_handling(&self) -> bool {
        self.handling.get()
    }

    fn enter(&self) -> Option<HandlingGuard<'_>> {
        if self.handling.replace(true) {
            return None;
        }
        Some(HandlingGuard { context: self })
    }
}

struct HandlingGuard<'a> {
    context: &'a CaptureContext,
}

impl Drop for HandlingGuard<'_> {
    fn drop(&mut self) {
        self.context.handling.set(false);
    }
}

thread_local! {
    static PANIC_CONTEXT: CaptureContext = CaptureContext::new();
}

/// Registered adapters feeding one logger
pub struct Capture {
    logger: Arc<Logger>,
    sources: HashSet<CaptureSource>,
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl Capture {
    /// No sources registered
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            logger,
            sources: HashSet::new(),
        }
    }

    /// Register the sources enabled in the logger's configuration
    pub fn from_config(logger: Arc<Logger>) -> Self {
        let enabled: Vec<CaptureSource> = CaptureSource::ALL
            .into_iter()
            .filter(|s| s.enabled_in(&logger.config().capture))
            .collect();
        Self::new(logger).register(&enabled)
    }

    pub fn register(mut self, sources: &[CaptureSource]) -> Self {
        self.sources.extend(sources.iter().copied());
        self
    }

    pub fn is_registered(&self, source: CaptureSource) -> bool {
        self.sources.contains(&source)
    }

    fn emit(
        &self,
        source: CaptureSource,
        ctx: &CaptureContext,
        event: RawEvent,
    ) -> Option<LogOutcome> {
        if !self.is_registered(source) {
            return None;
        }
        let _guard = ctx.enter()?;
        Some(self.logger.log_event(event))
    }

    pub fn runtime_error(
        &self,
        ctx: &CaptureContext,
        signal: &RuntimeErrorSignal,
    ) -> Option<LogOutcome> {
        let event = RawEvent::new("runtime_error", signal.severity.log_type(), &signal.message)
            .location(&signal.file, signal.line)
            .extra(signal.severity.as_str())
            .context(json!({
                "file": signal.file,
                "line": signal.line,
                "severity": signal.severity.as_str(),
            }));
        self.emit(CaptureSource::RuntimeErrors, ctx, event)
    }

    pub fn panic(&self, ctx: &CaptureContext, signal: &PanicSignal) -> Option<LogOutcome> {
        let mut context = json!({
            "file": signal.file,
            "line": signal.line,
        });
        if let Some(ref trace) = signal.trace {
            context["trace"] = json!(trace);
        }
        let event = RawEvent::new(
            "exception",
            LogType::Error,
            format!("Uncaught panic: {}", signal.message),
        )
        .location(&signal.file, signal.line)
        .context(context);
        self.emit(CaptureSource::Panics, ctx, event)
    }

    /// Only fatal signals are recorded
    pub fn shutdown(&self, ctx: &CaptureContext, signal: &ShutdownSignal) -> Option<LogOutcome> {
        if signal.severity != Severity::Fatal {
            return None;
        }
        let event = RawEvent::new("shutdown", LogType::Error, "Fatal error on shutdown")
            .location(&signal.file, signal.line)
            .extra(format!("{}:{}", signal.severity.as_str(), signal.message))
            .context(json!({
                "message": signal.message,
                "file": signal.file,
                "line": signal.line,
                "severity": signal.severity.as_str(),
            }));
        self.emit(CaptureSource::ShutdownFatal, ctx, event)
    }

    /// Transport failures and responses with status >= 400
    pub fn http(&self, ctx: &CaptureContext, signal: &HttpSignal) -> Option<LogOutcome> {
        let event = match signal {
            HttpSignal::Failed {
                url,
                request,
                error,
            } => RawEvent::new("http_error", LogType::Error, "HTTP API request failed")
                .location(url, 0)
                .extra(format!("{}:{}", error.code, error.message))
                .context(json!({
                    "url": url,
                    "args": request,
                    "error": {
                        "code": error.code,
                        "message": error.message,
                        "data": error.data,
                    },
                })),
            HttpSignal::Response {
                url,
                status,
                headers,
                body,
            } => {
                if *status < 400 {
                    return None;
                }
                let excerpt: String = body.chars().take(BODY_EXCERPT_LEN).collect();
                RawEvent::new("http_status", LogType::Warning, "HTTP API non-2xx response")
                    .location(url, 0)
                    .extra(status)
                    .context(json!({
                        "url": url,
                        "status": status,
                        "response": {
                            "headers": headers,
                            "body_excerpt": excerpt,
                        },
                    }))
            }
        };
        self.emit(CaptureSource::HttpFailures, ctx, event)
    }

    /// Host error objects; `error` when the code mentions it, `info` otherwise
    pub fn host_error(&self, ctx: &CaptureContext, error: &StructuredError) -> Option<LogOutcome> {
        let log_type = if error.code.to_lowercase().contains("error") {
            LogType::Error
        } else {
            LogType::Info
        };
        let event = RawEvent::new(
            "host_error",
            log_type,
            format!("Host error added: {}", error.message),
        )
        .extra(&error.code)
        .context(json!({
            "code": error.code,
            "data": error.data,
        }));
        self.emit(CaptureSource::HostErrors, ctx, event)
    }

    /// Scheduler spawn failure, with or without a structured cause
    pub fn cron_failed(
        &self,
        ctx: &CaptureContext,
        cause: Option<&StructuredError>,
    ) -> Option<LogOutcome> {
        let event = match cause {
            Some(error) => {
                RawEvent::new("cron_failed", LogType::Error, "Scheduled job spawn failed")
                    .extra(format!("{}:{}", error.code, error.message))
                    .context(json!({
                        "code": error.code,
                        "message": error.message,
                        "data": error.data,
                    }))
            }
            None => RawEvent::new(
                "cron_failed",
                LogType::Error,
                "Scheduled job spawn failed (unknown error)",
            )
            .extra("unknown"),
        };
        self.emit(CaptureSource::CronFailures, ctx, event)
    }
}

/// Record panics through `capture`, then run the previously installed hook
pub fn install_panic_hook(capture: Arc<Capture>) {
    if !capture.is_registered(CaptureSource::Panics) {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let signal = PanicSignal::from_parts(info.payload(), info.location());
        capture_panic(&capture, &signal);
        previous(info);
    }));
}

/// Capture `signal` on this thread's context. Skipped once the thread-local
/// context has been torn down.
fn capture_panic(capture: &Capture, signal: &PanicSignal) -> Option<LogOutcome> {
    PANIC_CONTEXT
        .try_with(|ctx| capture.panic(ctx, signal))
        .ok()
        .flatten()
}
