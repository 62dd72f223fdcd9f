//! Recurring jobs
//!
//! The host owns the timer (cron, systemd timer); this module only decides
//! which jobs are due from their persisted last-run times.

use crate::error::CoreError;
use crate::sqlite_storage::LogStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// A recurring job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    /// Hourly cached JSON check
    IntegrityCheck,
    /// Daily retention purge
    RetentionPurge,
}

impl Job {
    pub const ALL: [Job; 2] = [Job::IntegrityCheck, Job::RetentionPurge];

    pub fn name(&self) -> &'static str {
        match self {
            Job::IntegrityCheck => "integrity_check",
            Job::RetentionPurge => "retention_purge",
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Job::IntegrityCheck => Duration::hours(1),
            Job::RetentionPurge => Duration::days(1),
        }
    }

    /// Due when it never ran or its interval has elapsed
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run {
            None => true,
            Some(last) => now - last >= self.interval(),
        }
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Jobs due at `now`
pub fn due_jobs(store: &LogStore, now: DateTime<Utc>) -> Result<Vec<Job>, CoreError> {
    let mut due = Vec::new();
    for job in Job::ALL {
        if job.is_due(store.last_run(job.name())?, now) {
            due.push(job);
        }
    }
    Ok(due)
}

/// Persist that `job` ran at `now`
pub fn mark_run(store: &LogStore, job: Job, now: DateTime<Utc>) -> Result<(), CoreError> {
    store.set_last_run(job.name(), now)
}
