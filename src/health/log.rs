//! Session health counters.
//!
//! Tracks what the engine did this session (events folded, events dropped,
//! saves and backups) without touching the aggregate itself. Persisted next to
//! the snapshot so `keytally status` can report on a running or finished daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Health statistics for the current session.
#[derive(Debug)]
pub struct HealthLog {
    /// Key-down events folded into the aggregate
    key_events: AtomicU64,
    /// Key-down events dropped because the capture queue was full
    dropped_events: AtomicU64,
    /// Snapshots written successfully
    saves_completed: AtomicU64,
    /// Snapshot writes that failed
    save_failures: AtomicU64,
    /// Backups created
    backups_created: AtomicU64,
    /// Backups that failed
    backup_failures: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl HealthLog {
    /// Create a new health log.
    pub fn new() -> Self {
        Self {
            key_events: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            saves_completed: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
            backups_created: AtomicU64::new(0),
            backup_failures: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a health log that can be written to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);
        log
    }

    /// Count events folded into the aggregate.
    pub fn record_key_events(&self, count: u64) {
        self.key_events.fetch_add(count, Ordering::Relaxed);
    }

    /// Overwrite the dropped-event count with the capture layer's tally.
    pub fn set_dropped_events(&self, count: u64) {
        self.dropped_events.store(count, Ordering::Relaxed);
    }

    /// Record a successful snapshot write.
    pub fn record_save(&self) {
        self.saves_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed snapshot write.
    pub fn record_save_failure(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backup that was created.
    pub fn record_backup(&self) {
        self.backups_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backup attempt that failed.
    pub fn record_backup_failure(&self) {
        self.backup_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> HealthStats {
        HealthStats {
            key_events: self.key_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            saves_completed: self.saves_completed.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            backups_created: self.backups_created.load(Ordering::Relaxed),
            backup_failures: self.backup_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            updated_at: Utc::now(),
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        self.stats().summary()
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let json =
                serde_json::to_string_pretty(&self.stats()).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
            debug!(path = %path.display(), "health log saved");
        }
        Ok(())
    }

    /// Read the stats persisted by a previous or concurrent session.
    pub fn read(path: &std::path::Path) -> Result<Option<HealthStats>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let stats = serde_json::from_str(&content).map_err(std::io::Error::other)?;
        Ok(Some(stats))
    }
}

impl Default for HealthLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStats {
    pub key_events: u64,
    pub dropped_events: u64,
    pub saves_completed: u64,
    pub save_failures: u64,
    pub backups_created: u64,
    pub backup_failures: u64,
    pub session_start: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HealthStats {
    /// Seconds between session start and the last update.
    pub fn session_duration_secs(&self) -> i64 {
        (self.updated_at - self.session_start).num_seconds()
    }

    pub fn summary(&self) -> String {
        format!(
            "Session Health:\n\
             - Key events recorded: {}\n\
             - Key events dropped: {}\n\
             - Snapshots saved: {} ({} failed)\n\
             - Backups created: {} ({} failed)\n\
             - Session duration: {} seconds",
            self.key_events,
            self.dropped_events,
            self.saves_completed,
            self.save_failures,
            self.backups_created,
            self.backup_failures,
            self.session_duration_secs()
        )
    }
}

/// Thread-safe shared health log.
pub type SharedHealthLog = Arc<HealthLog>;

/// Create a new shared health log.
pub fn create_shared_log() -> SharedHealthLog {
    Arc::new(HealthLog::new())
}

/// Create a new shared health log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedHealthLog {
    Arc::new(HealthLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_log_counting() {
        let log = HealthLog::new();

        log.record_key_events(3);
        log.record_save();
        log.record_save_failure();
        log.set_dropped_events(2);

        let stats = log.stats();
        assert_eq!(stats.key_events, 3);
        assert_eq!(stats.saves_completed, 1);
        assert_eq!(stats.save_failures, 1);
        assert_eq!(stats.dropped_events, 2);
    }

    #[test]
    fn test_summary_format() {
        let log = HealthLog::new();
        let summary = log.summary();

        assert!(summary.contains("Key events recorded"));
        assert!(summary.contains("Backups created"));
    }

    #[test]
    fn test_persist_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.json");
        let log = HealthLog::with_persistence(path.clone());
        log.record_backup();
        log.save().unwrap();

        let read = HealthLog::read(&path).unwrap().unwrap();
        assert_eq!(read.backups_created, 1);
        assert!(HealthLog::read(&dir.path().join("missing.json"))
            .unwrap()
            .is_none());
    }
}
