//! SQLite-backed log storage for Faultline
//!
//! Holds the log table, the durable dedup tier and the scheduler's
//! last-run bookkeeping in a single database. Every statement runs under
//! one connection mutex, so individual row writes are atomic with respect
//! to concurrent callers in the same process.

use crate::dedup::DedupStore;
use crate::error::{CoreError, StorageError};
use crate::event::{LogRecord, LogType, NewRecord};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Storage format of `created_at` (UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default page size for listings
pub const DEFAULT_PER_PAGE: usize = 20;

/// Largest LIMIT/OFFSET SQLite accepts
const MAX_SQL_INT: usize = i64::MAX as usize;

/// SQLite-backed log store
pub struct LogStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

/// Filters for listing records
#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub log_type: Option<String>,
    /// Substring matched against message and context
    pub search: Option<String>,
    /// Inclusive, from 00:00:00
    pub date_from: Option<NaiveDate>,
    /// Inclusive, until 23:59:59
    pub date_to: Option<NaiveDate>,
    /// 1-based page number
    pub page: usize,
    pub per_page: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            log_type: None,
            search: None,
            date_from: None,
            date_to: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl LogQuery {
    /// Drop a type filter that is not registered, clamp paging
    pub fn normalized(mut self, allowed_types: &[String]) -> Self {
        self.log_type = self
            .log_type
            .map(|t| t.trim().to_lowercase())
            .filter(|t| allowed_types.contains(t));
        self.search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self.page = self.page.max(1);
        self.per_page = self.per_page.max(1);
        self
    }

    fn where_clause(&self) -> (String, Vec<String>) {
        let mut sql = String::from(" WHERE 1=1");
        let mut values = Vec::new();

        if let Some(ref log_type) = self.log_type {
            sql.push_str(" AND type = ?");
            values.push(log_type.clone());
        }
        if let Some(ref search) = self.search {
            sql.push_str(" AND (message LIKE ? ESCAPE '\\' OR context LIKE ? ESCAPE '\\')");
            let like = format!("%{}%", escape_like(search));
            values.push(like.clone());
            values.push(like);
        }
        if let Some(date_from) = self.date_from {
            sql.push_str(" AND created_at >= ?");
            values.push(format!("{} 00:00:00", date_from.format("%Y-%m-%d")));
        }
        if let Some(date_to) = self.date_to {
            sql.push_str(" AND created_at <= ?");
            values.push(format!("{} 23:59:59", date_to.format("%Y-%m-%d")));
        }
        (sql, values)
    }
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| StorageError::InvalidTimestamp(raw.to_string()))
}

impl LogStore {
    /// Create a new log store, opening or creating the database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        let conn = Connection::open(db_path).map_err(StorageError::Sqlite)?;
        let storage = Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory store (tests, dry runs).
    pub fn in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().map_err(StorageError::Sqlite)?;
        let storage = Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize the database schema (tables and indexes).
    fn init_schema(&self) -> Result<(), CoreError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    type TEXT NOT NULL,
                    message TEXT NOT NULL,
                    context TEXT NULL,
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
                );
                CREATE INDEX IF NOT EXISTS idx_logs_type ON logs(type);
                CREATE INDEX IF NOT EXISTS idx_logs_created ON logs(created_at);

                CREATE TABLE IF NOT EXISTS dedup_entries (
                    key TEXT PRIMARY KEY,
                    first_seen TEXT NOT NULL,
                    expires_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS job_runs (
                    job TEXT PRIMARY KEY,
                    last_run TEXT NOT NULL
                );",
            )
            .map_err(StorageError::Sqlite)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Insert a record and return its id
    pub fn insert(&self, record: &NewRecord, created_at: DateTime<Utc>) -> Result<i64, CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO logs (type, message, context, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.log_type.as_str(),
                record.message,
                record.context,
                format_timestamp(&created_at),
            ],
        )
        .map_err(StorageError::Sqlite)?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetch one record by id
    pub fn get(&self, id: i64) -> Result<Option<LogRecord>, CoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, type, message, context, created_at FROM logs WHERE id = ?1",
                params![id],
                raw_row,
            )
            .optional()
            .map_err(StorageError::Sqlite)?;
        row.map(into_record).transpose().map_err(CoreError::from)
    }

    /// Query a page of records, most recent first
    pub fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>, CoreError> {
        let (where_sql, mut values) = query.where_clause();
        let sql = format!(
            "SELECT id, type, message, context, created_at FROM logs{where_sql} ORDER BY id DESC LIMIT ? OFFSET ?"
        );
        let limit = query.per_page.clamp(1, MAX_SQL_INT);
        let offset = query
            .page
            .saturating_sub(1)
            .saturating_mul(limit)
            .min(MAX_SQL_INT);
        values.push(limit.to_string());
        values.push(offset.to_string());
        self.select(&sql, &values)
    }

    /// Count records matching the filters (paging ignored)
    pub fn count(&self, query: &LogQuery) -> Result<usize, CoreError> {
        let (where_sql, values) = query.where_clause();
        let sql = format!("SELECT COUNT(*) FROM logs{where_sql}");
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(&sql, rusqlite::params_from_iter(values.iter()), |row| row.get(0))
            .map_err(StorageError::Sqlite)?;
        Ok(count as usize)
    }

    /// Every record, most recent first
    pub fn all(&self) -> Result<Vec<LogRecord>, CoreError> {
        self.select(
            "SELECT id, type, message, context, created_at FROM logs ORDER BY id DESC",
            &[],
        )
    }

    fn select(&self, sql: &str, values: &[String]) -> Result<Vec<LogRecord>, CoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(StorageError::Sqlite)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), raw_row)
            .map_err(StorageError::Sqlite)?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(StorageError::Sqlite)?;
            records.push(into_record(raw)?);
        }
        Ok(records)
    }

    /// Delete every record. Returns the number of rows removed.
    pub fn clear_all(&self) -> Result<usize, CoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM logs", [])
            .map_err(StorageError::Sqlite)?;
        Ok(removed)
    }

    /// Delete records created strictly before `cutoff`
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, CoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM logs WHERE created_at < ?1",
                params![format_timestamp(&cutoff)],
            )
            .map_err(StorageError::Sqlite)?;
        Ok(removed)
    }

    /// Drop dedup entries whose window has elapsed
    pub fn purge_expired_dedup(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM dedup_entries WHERE expires_at <= ?1",
                params![format_timestamp(&now)],
            )
            .map_err(StorageError::Sqlite)?;
        Ok(removed)
    }

    /// Last recorded run of a scheduled job
    pub fn last_run(&self, job: &str) -> Result<Option<DateTime<Utc>>, CoreError> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_run FROM job_runs WHERE job = ?1",
                params![job],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::Sqlite)?;
        Ok(raw.as_deref().map(parse_timestamp).transpose()?)
    }

    pub fn set_last_run(&self, job: &str, at: DateTime<Utc>) -> Result<(), CoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO job_runs (job, last_run) VALUES (?1, ?2)
             ON CONFLICT(job) DO UPDATE SET last_run = excluded.last_run",
            params![job, format_timestamp(&at)],
        )
        .map_err(StorageError::Sqlite)?;
        Ok(())
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

impl DedupStore for LogStore {
    fn check_and_insert(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let now_str = format_timestamp(&now);
        conn.execute(
            "DELETE FROM dedup_entries WHERE key = ?1 AND expires_at <= ?2",
            params![key, now_str],
        )?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO dedup_entries (key, first_seen, expires_at) VALUES (?1, ?2, ?3)",
            params![key, now_str, format_timestamp(&(now + ttl))],
        )?;
        Ok(inserted == 0)
    }
}

type RawRow = (i64, String, String, Option<String>, String);

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_record(
    (id, log_type, message, context, created_at): RawRow,
) -> Result<LogRecord, StorageError> {
    Ok(LogRecord {
        id,
        log_type: LogType::parse(&log_type),
        message,
        context,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Row shape shared by both export formats
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: i64,
    #[serde(rename = "type")]
    log_type: &'a str,
    message: &'a str,
    context: Option<&'a str>,
    created_at: String,
}

impl<'a> From<&'a LogRecord> for ExportRow<'a> {
    fn from(record: &'a LogRecord) -> Self {
        Self {
            id: record.id,
            log_type: record.log_type.as_str(),
            message: &record.message,
            context: record.context.as_deref(),
            created_at: format_timestamp(&record.created_at),
        }
    }
}

/// CSV column order, written even when there are no records
const CSV_HEADER: [&str; 5] = ["id", "type", "message", "context", "created_at"];

/// Render records as CSV with header `id,type,message,context,created_at`.
/// `context` is the raw JSON string, empty when absent.
pub fn export_csv(records: &[LogRecord]) -> Result<String, StorageError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for record in records {
        writer.serialize(ExportRow::from(record))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| StorageError::Write(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| StorageError::Write(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Render records as a pretty-printed JSON array
pub fn export_json(records: &[LogRecord]) -> Result<String, StorageError> {
    let rows: Vec<ExportRow<'_>> = records.iter().map(ExportRow::from).collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}
