//! Retention sweeper
//!
//! Deletes records older than the configured retention window, along with
//! expired dedup entries and old file-sink files.

use crate::config::Config;
use crate::error::CoreError;
use crate::sqlite_storage::LogStore;
use crate::storage::cleanup_old_logs;
use crate::types::Clock;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Counts removed by one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub cutoff: Option<DateTime<Utc>>,
    pub records: usize,
    pub dedup_entries: usize,
    pub files: usize,
}

/// Delete everything older than `now - retention_days`. Idempotent.
pub fn purge(
    config: &Config,
    store: &LogStore,
    clock: &dyn Clock,
) -> Result<PurgeReport, CoreError> {
    let now = clock.now();
    let days = config.logging.retention_days.max(1);
    let cutoff = now - Duration::days(days as i64);

    let records = store.purge_older_than(cutoff)?;
    let dedup_entries = store.purge_expired_dedup(now)?;

    let files = if config.logging.enable_file_logging {
        match config
            .logging
            .effective_log_dir()
            .and_then(|dir| cleanup_old_logs(&dir, days, now))
        {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "failed to clean up old log files");
                0
            }
        }
    } else {
        0
    };

    info!(records, dedup_entries, files, cutoff = %cutoff, "retention purge finished");
    Ok(PurgeReport {
        cutoff: Some(cutoff),
        records,
        dedup_entries,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupStore;
    use crate::event::{LogType, NewRecord};
    use crate::types::ManualClock;
    use chrono::TimeZone;

    fn insert(store: &LogStore, message: &str, at: DateTime<Utc>) {
        store
            .insert(
                &NewRecord {
                    log_type: LogType::Info,
                    message: message.to_string(),
                    context: None,
                },
                at,
            )
            .unwrap();
    }

    #[test]
    fn test_purge_removes_only_records_past_retention() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(now);
        let store = LogStore::in_memory().unwrap();
        insert(&store, "forty days", now - Duration::days(40));
        insert(&store, "five days", now - Duration::days(5));

        let report = purge(&Config::default(), &store, &clock).unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.cutoff, Some(now - Duration::days(30)));

        let left = store.all().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message, "five days");
    }

    #[test]
    fn test_purge_is_idempotent() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(now);
        let store = LogStore::in_memory().unwrap();
        insert(&store, "old", now - Duration::days(90));

        assert_eq!(purge(&Config::default(), &store, &clock).unwrap().records, 1);
        assert_eq!(purge(&Config::default(), &store, &clock).unwrap().records, 0);
    }

    #[test]
    fn test_purge_clamps_zero_retention() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(now);
        let store = LogStore::in_memory().unwrap();
        insert(&store, "twelve hours", now - Duration::hours(12));

        let mut config = Config::default();
        config.logging.retention_days = 0;
        assert_eq!(purge(&config, &store, &clock).unwrap().records, 0);
    }

    #[test]
    fn test_purge_drops_expired_dedup_entries() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(now);
        let store = LogStore::in_memory().unwrap();
        store
            .check_and_insert("dedup_a", now - Duration::hours(30), Duration::hours(24))
            .unwrap();
        store
            .check_and_insert("dedup_b", now, Duration::hours(24))
            .unwrap();

        let report = purge(&Config::default(), &store, &clock).unwrap();
        assert_eq!(report.dedup_entries, 1);
    }
}
