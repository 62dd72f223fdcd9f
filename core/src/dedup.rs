//! Event deduplication
//!
//! Two tiers: a session set held in memory and a durable, time-expiring
//! store shared between processes. An event is written at most once per
//! fingerprint per window.

use crate::error::StorageError;
use crate::types::Clock;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Prefix of durable keys
const DURABLE_KEY_PREFIX: &str = "dedup_";
/// Fingerprint characters kept in the durable key
const DURABLE_KEY_LEN: usize = 32;
/// Upper bound on fingerprints held in memory
pub const MAX_SESSION_ENTRIES: usize = 1024;
/// Session lifetime of an entry when durable dedup is disabled
pub const ZERO_WINDOW_SESSION_SECS: i64 = 60;

/// Durable, time-expiring dedup tier
pub trait DedupStore: Send + Sync {
    /// Returns `true` when an unexpired entry for `key` already exists.
    /// Otherwise records `key` until `now + ttl` and returns `false`.
    fn check_and_insert(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StorageError>;
}

/// Process-local durable tier, for tests and single-process hosts
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupStore for MemoryDedupStore {
    fn check_and_insert(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => Ok(true),
            _ => {
                entries.insert(key.to_string(), now + ttl);
                Ok(false)
            }
        }
    }
}

fn location_suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\s*\(in\s+[^)]+\)\s*$").expect("valid regex"))
}

fn version_note_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\s*\((?:This message was )?added in version [^)]+\)\s*")
            .expect("valid regex")
    })
}

/// Strip run-dependent annotations from a message
pub fn normalize_message(message: &str) -> String {
    let trimmed = message.trim();
    let without_location = location_suffix_pattern().replace(trimmed, "");
    version_note_pattern()
        .replace_all(&without_location, "")
        .trim()
        .to_string()
}

/// Lowercase, forward-slash form of a source path
pub fn normalize_file(file: &str) -> String {
    file.trim().replace('\\', "/").to_lowercase()
}

/// Stable SHA-256 fingerprint (hex) of an event
///
/// # Examples
///
/// ```
/// use faultline_core::dedup::fingerprint;
///
/// let a = fingerprint("error", "Boom (in /srv/app.rs:10)", "/srv/app.rs", 10, "");
/// let b = fingerprint("error", "Boom", "/SRV/app.rs", 10, "");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
pub fn fingerprint(log_type: &str, message: &str, file: &str, line: u32, extra: &str) -> String {
    let material = format!(
        "{}:{}:{}:{}:{}",
        log_type.trim().to_lowercase(),
        normalize_file(file),
        line,
        normalize_message(message),
        extra
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}

/// Key used in the durable tier
pub fn durable_key(fingerprint: &str) -> String {
    let end = fingerprint.len().min(DURABLE_KEY_LEN);
    format!("{DURABLE_KEY_PREFIX}{}", &fingerprint[..end])
}

/// Gate deciding whether an event is a repeat
pub struct Deduplicator {
    /// Fingerprint to the time it was last let through
    session: Mutex<HashMap<String, DateTime<Utc>>>,
    store: Arc<dyn DedupStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn DedupStore>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            session: Mutex::new(HashMap::new()),
            store,
            clock,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// How long a session entry suppresses repeats
    fn session_ttl(&self) -> Duration {
        if self.window > Duration::zero() {
            self.window
        } else {
            Duration::seconds(ZERO_WINDOW_SESSION_SECS)
        }
    }

    /// Check and record `fingerprint`.
    ///
    /// Session entries expire with the window (or after
    /// [`ZERO_WINDOW_SESSION_SECS`] when the window is zero, which also
    /// skips the durable tier). A failing durable tier lets the event
    /// through.
    pub fn is_duplicate(&self, fingerprint: &str) -> bool {
        let now = self.clock.now();
        let ttl = self.session_ttl();
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(seen_at) = session.get(fingerprint) {
            if now < *seen_at + ttl {
                return true;
            }
        }

        let duplicate = self.window > Duration::zero() && self.durable_seen(fingerprint, now);
        if !duplicate {
            if session.len() >= MAX_SESSION_ENTRIES {
                evict(&mut session, now, ttl);
            }
            session.insert(fingerprint.to_string(), now);
        }
        duplicate
    }

    fn durable_seen(&self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        let key = durable_key(fingerprint);
        match self.store.check_and_insert(&key, now, self.window) {
            Ok(seen) => seen,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "dedup store unavailable, logging event");
                false
            }
        }
    }

    /// Forget the session tier (start of a new processing run)
    pub fn reset_session(&self) {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Fingerprints currently held by the session tier
    pub fn session_len(&self) -> usize {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Drop expired entries; when none expired, drop the oldest one
fn evict(session: &mut HashMap<String, DateTime<Utc>>, now: DateTime<Utc>, ttl: Duration) {
    session.retain(|_, seen_at| now < *seen_at + ttl);
    if session.len() < MAX_SESSION_ENTRIES {
        return;
    }
    let oldest = session
        .iter()
        .min_by_key(|(_, seen_at)| **seen_at)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        session.remove(&key);
    }
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
