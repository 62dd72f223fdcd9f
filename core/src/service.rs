//! Service object
//!
//! Owns one instance of every component for the lifetime of the process:
//! configuration, store, logging facade, checker and capture adapters.
//! Hosts construct it once and pass it by reference.

use crate::capture::Capture;
use crate::checker::{ApiClient, BatchCheckResult, CheckResult, GlobalSetSource, JsonChecker};
use crate::config::Config;
use crate::error::CoreError;
use crate::event::LogRecord;
use crate::hooks::Hooks;
use crate::logger::Logger;
use crate::notify::Notifier;
use crate::retention::{self, PurgeReport};
use crate::schedule::{self, Job};
use crate::sqlite_storage::{export_csv, export_json, LogQuery, LogStore};
use crate::types::{Clock, SystemClock};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

/// Who is asking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub admin: bool,
}

impl Principal {
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: true,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: false,
        }
    }
}

/// On-demand operator action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    CheckNow,
    CheckFile(String),
    ClearAll,
    Purge,
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::CheckNow => "check-now",
            Trigger::CheckFile(_) => "check-file",
            Trigger::ClearAll => "clear-all",
            Trigger::Purge => "purge",
        }
    }
}

/// Result of a trigger or a scheduled job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "result", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Checked(BatchCheckResult),
    CheckedFile(CheckResult),
    Cleared(usize),
    Purged(PurgeReport),
}

/// Swappable collaborators
pub struct ServiceParts {
    pub store: Arc<LogStore>,
    pub notifier: Arc<Notifier>,
    pub source: Arc<dyn GlobalSetSource>,
    pub clock: Arc<dyn Clock>,
    pub cache_dir: PathBuf,
}

pub struct Service {
    config: Arc<Config>,
    store: Arc<LogStore>,
    logger: Arc<Logger>,
    checker: JsonChecker,
    capture: Arc<Capture>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("logger", &self.logger)
            .field("checker", &self.checker)
            .field("capture", &self.capture)
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Build the production service: SQLite at the configured path, HTTP
    /// notifications, sendmail, wall clock and the remote API client.
    pub fn open(config: Config, hooks: Hooks) -> Result<Self, CoreError> {
        let store = Arc::new(LogStore::new(&config.logging.effective_database_path()?)?);
        let parts = ServiceParts {
            store,
            notifier: Arc::new(Notifier::default()),
            source: Arc::new(ApiClient::from_config(&config)),
            clock: Arc::new(SystemClock),
            cache_dir: config.checker.effective_cache_dir()?,
        };
        Ok(Self::with_parts(config, hooks, parts))
    }

    pub fn with_parts(config: Config, hooks: Hooks, parts: ServiceParts) -> Self {
        let config = Arc::new(config);
        let logger = Arc::new(Logger::new(
            config.clone(),
            Arc::new(hooks),
            parts.store.clone(),
            parts.notifier,
            parts.clock.clone(),
        ));
        let checker = JsonChecker::new(parts.cache_dir, parts.source, logger.clone());
        let capture = Arc::new(Capture::from_config(logger.clone()));
        Self {
            config,
            store: parts.store,
            logger,
            checker,
            capture,
            clock: parts.clock,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    pub fn checker(&self) -> &JsonChecker {
        &self.checker
    }

    pub fn capture(&self) -> &Arc<Capture> {
        &self.capture
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// One page of records plus the total matching count. An unregistered
    /// type filter is ignored.
    pub fn query(&self, query: LogQuery) -> Result<(Vec<LogRecord>, usize), CoreError> {
        let query = query.normalized(self.logger.hooks().log_types());
        let records = self.store.query(&query)?;
        let total = self.store.count(&query)?;
        Ok((records, total))
    }

    /// Every record, most recent first
    pub fn export(&self, format: ExportFormat) -> Result<String, CoreError> {
        let records = self.store.all()?;
        match format {
            ExportFormat::Csv => Ok(export_csv(&records)?),
            ExportFormat::Json => Ok(export_json(&records)?),
        }
    }

    pub fn purge(&self) -> Result<PurgeReport, CoreError> {
        retention::purge(&self.config, &self.store, self.clock.as_ref())
    }

    pub fn check_all(&self) -> BatchCheckResult {
        self.checker.check_all()
    }

    /// Run an operator trigger. Every trigger requires an admin principal.
    pub fn run(
        &self,
        trigger: Trigger,
        principal: &Principal,
    ) -> Result<TriggerOutcome, CoreError> {
        if !principal.admin {
            return Err(CoreError::Unauthorized(trigger.name()));
        }
        info!(trigger = trigger.name(), principal = %principal.name, "running trigger");
        self.logger.reset_session();
        match trigger {
            Trigger::CheckNow => Ok(TriggerOutcome::Checked(self.check_all())),
            Trigger::CheckFile(filename) => Ok(TriggerOutcome::CheckedFile(
                self.checker.check_specific_file(&filename)?,
            )),
            Trigger::ClearAll => Ok(TriggerOutcome::Cleared(self.store.clear_all()?)),
            Trigger::Purge => Ok(TriggerOutcome::Purged(self.purge()?)),
        }
    }

    /// Run every due recurring job once and record its run time
    pub fn tick(&self) -> Result<Vec<(Job, TriggerOutcome)>, CoreError> {
        let now = self.clock.now();
        let mut ran = Vec::new();
        for job in schedule::due_jobs(&self.store, now)? {
            self.logger.reset_session();
            let outcome = match job {
                Job::IntegrityCheck => TriggerOutcome::Checked(self.check_all()),
                Job::RetentionPurge => TriggerOutcome::Purged(self.purge()?),
            };
            schedule::mark_run(&self.store, job, now)?;
            ran.push((job, outcome));
        }
        Ok(ran)
    }
}
