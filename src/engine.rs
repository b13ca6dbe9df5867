//! Application context owning every running component.
//!
//! [`Engine::start`] builds the aggregator, store, capture and both timers from
//! a [`Config`]; dropping the engine (or calling [`Engine::shutdown`]) stops
//! capture, drains it, stops the timers and writes a final snapshot.

use crate::collector::{Capture, CollectorError, EventSource, KeyId, SystemSource};
use crate::config::Config;
use crate::core::{
    create_shared_aggregator, display_name, AggregateStats, DateRange, RangeSummary,
    SharedAggregator,
};
use crate::health::{create_shared_log_with_persistence, HealthStats, SharedHealthLog};
use crate::scheduler::{AutosaveScheduler, BackupScheduler, Persister, SharedBackupManager};
use crate::storage::{
    BackupManager, BackupOutcome, BackupSettings, ExportFormat, LoadOutcome, SnapshotStore,
    StoreError,
};
use chrono::{Local, Utc};
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors that prevent the engine from starting.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The snapshot exists but could not be read. Starting anyway would let the
    /// next save overwrite it.
    #[error("failed to read snapshot: {0}")]
    Load(#[source] StoreError),
    #[error("failed to start background worker: {0}")]
    Spawn(#[from] io::Error),
}

/// Whether keystrokes are currently being observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Running,
    /// The user has not granted input monitoring; retry after they do.
    PermissionDenied,
    Failed(String),
    Stopped,
}

impl CaptureState {
    fn from_result(result: Result<(), CollectorError>) -> Self {
        match result {
            Ok(()) => CaptureState::Running,
            Err(CollectorError::PermissionDenied) => CaptureState::PermissionDenied,
            Err(CollectorError::CaptureFailed(reason)) => CaptureState::Failed(reason),
        }
    }
}

/// How startup found the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupLoad {
    Loaded { total_count: u64 },
    Empty,
    Recovered { quarantined: PathBuf },
    Cleared,
}

pub struct Engine<S: EventSource = SystemSource> {
    config: Config,
    aggregator: SharedAggregator,
    store: Arc<SnapshotStore>,
    persister: Arc<Persister>,
    health: SharedHealthLog,
    capture: Capture<S>,
    capture_state: CaptureState,
    autosave: AutosaveScheduler,
    backups: BackupScheduler,
    startup_load: StartupLoad,
    shut_down: bool,
}

impl<S: EventSource> Engine<S> {
    /// Load the snapshot, start capture and both timers.
    ///
    /// A denied capture permission does not fail startup; it is reported by
    /// [`capture_state`](Self::capture_state) and can be retried.
    pub fn start(config: Config, source: S) -> Result<Self, EngineError> {
        if let Err(e) = config.ensure_directories() {
            warn!(error = %e, "failed to create data directories");
        }

        let aggregator = create_shared_aggregator(config.delete_key_id);
        let store = Arc::new(SnapshotStore::new(config.snapshot_path()));
        let health = create_shared_log_with_persistence(config.health_path());
        let persister = Arc::new(Persister::new(
            aggregator.clone(),
            store.clone(),
            health.clone(),
        ));

        let outcome = store.load().map_err(EngineError::Load)?;
        let clear_pending = config.clear_request_path().exists();
        let startup_load = match outcome {
            _ if clear_pending => StartupLoad::Cleared,
            LoadOutcome::Loaded(stats) => {
                let total_count = stats.total_count;
                aggregator.load(stats);
                persister.mark_saved(aggregator.revision());
                StartupLoad::Loaded { total_count }
            }
            LoadOutcome::NotFound => StartupLoad::Empty,
            LoadOutcome::Recovered { quarantined } => {
                warn!(path = %quarantined.display(), "snapshot was corrupt; starting empty");
                StartupLoad::Recovered { quarantined }
            }
        };
        info!(?startup_load, "snapshot loaded");
        if clear_pending {
            // Must complete before capture starts
            match persister.persist() {
                Ok(_) => {
                    info!("applied pending clear request");
                    remove_clear_request(&config.clear_request_path());
                }
                Err(e) => warn!(error = %e, "failed to apply pending clear request"),
            }
        }

        let mut capture = Capture::new(source, aggregator.clone()).with_health(health.clone());
        let capture_state = CaptureState::from_result(capture.start());
        match &capture_state {
            CaptureState::Running => {}
            CaptureState::PermissionDenied => {
                warn!("input monitoring permission denied; capture is paused until it is granted")
            }
            other => error!(state = ?other, "capture did not start"),
        }

        let autosave = AutosaveScheduler::spawn(persister.clone(), config.autosave_interval)?;
        let backup_manager: SharedBackupManager = Arc::new(Mutex::new(BackupManager::open(
            config.snapshot_path(),
            config.backup_dir(),
            config.backup_state_path(),
            config.backup,
            Utc::now(),
        )));
        let backups =
            BackupScheduler::spawn(backup_manager, health.clone(), config.backup_check_interval)?;

        Ok(Self {
            config,
            aggregator,
            store,
            persister,
            health,
            capture,
            capture_state,
            autosave,
            backups,
            startup_load,
            shut_down: false,
        })
    }

    /// The configuration the engine was started with, plus applied changes.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// What startup found on disk.
    pub fn startup_load(&self) -> &StartupLoad {
        &self.startup_load
    }

    /// A consistent copy of the live aggregate.
    pub fn stats(&self) -> AggregateStats {
        self.aggregator.snapshot()
    }

    /// The shared live aggregator.
    pub fn aggregator(&self) -> &SharedAggregator {
        &self.aggregator
    }

    /// Human-readable name for a key id.
    pub fn key_name(&self, key_id: KeyId) -> String {
        display_name(key_id)
    }

    /// Summarize `range` relative to the local date.
    pub fn summary(&self, range: DateRange, top: usize) -> RangeSummary {
        RangeSummary::compute(&self.stats(), range, Local::now().date_naive(), top)
    }

    /// Reset the aggregate and overwrite the snapshot with the empty state.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.aggregator.clear();
        self.persister.persist()?;
        info!("statistics cleared");
        Ok(())
    }

    /// Write a copy of the current aggregate to `destination`.
    pub fn export_snapshot(
        &self,
        destination: &Path,
        format: ExportFormat,
    ) -> Result<PathBuf, StoreError> {
        self.store.export(&self.stats(), destination, format)
    }

    /// Persist immediately. Returns whether anything was written.
    pub fn save_now(&self) -> Result<bool, StoreError> {
        self.autosave.flush()
    }

    /// Current capture state.
    pub fn capture_state(&self) -> &CaptureState {
        &self.capture_state
    }

    /// Try to start capture again, e.g. after the user granted permission.
    pub fn retry_capture(&mut self) -> &CaptureState {
        if self.shut_down || self.capture.is_running() {
            return &self.capture_state;
        }
        self.capture_state = CaptureState::from_result(self.capture.start());
        if self.capture_state == CaptureState::Running {
            info!("capture started after retry");
        }
        &self.capture_state
    }

    /// Events dropped because the capture queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.capture.dropped_events()
    }

    /// Apply new backup settings. Returns whether the schedule was reset.
    pub fn apply_backup_settings(&mut self, settings: BackupSettings) -> bool {
        self.config.backup = settings;
        self.backups.apply_settings(settings)
    }

    /// The backup manager shared with the backup timer.
    pub fn backup_manager(&self) -> &SharedBackupManager {
        self.backups.manager()
    }

    /// Back up the current snapshot regardless of schedule.
    pub fn backup_now(&self) -> Result<BackupOutcome, StoreError> {
        self.save_now()?;
        let outcome = self.backups.manager().lock().backup_now(Utc::now());
        match &outcome {
            Ok(BackupOutcome::Created(_)) => self.health.record_backup(),
            Err(_) => self.health.record_backup_failure(),
            Ok(_) => {}
        }
        outcome
    }

    /// Honor a clear requested by another process. Returns whether one was
    /// pending and handled.
    pub fn process_clear_request(&self) -> bool {
        let marker = self.config.clear_request_path();
        if !marker.exists() {
            return false;
        }

        info!("clear requested by another process");
        if let Err(e) = self.clear() {
            // The marker stays, so the next poll retries
            warn!(error = %e, "failed to clear statistics");
            return false;
        }
        remove_clear_request(&marker);
        true
    }

    /// Point-in-time copy of the health counters.
    pub fn health(&self) -> HealthStats {
        self.health.stats()
    }

    /// Write the health counters to disk, logging failures.
    pub fn save_health(&self) {
        if let Err(e) = self.health.save() {
            warn!(error = %e, "failed to save health log");
        }
    }

    /// Stop capture, drain it, stop the timers and save one last time.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.capture.stop();
        self.capture_state = CaptureState::Stopped;
        self.autosave.stop();
        self.backups.stop();

        match self.persister.persist() {
            Ok(_) => info!(total = self.aggregator.total_count(), "final snapshot saved"),
            Err(e) => error!(error = %e, "final save failed"),
        }
        self.save_health();
    }
}

impl<S: EventSource> Drop for Engine<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn remove_clear_request(marker: &Path) {
    if let Err(e) = fs::remove_file(marker) {
        warn!(error = %e, path = %marker.display(), "failed to remove clear request");
    }
}

/// Ask a running daemon (or the next one to start) to clear its statistics.
///
/// Also overwrites the snapshot with the empty state so readers see the clear
/// immediately.
pub fn request_clear(config: &Config) -> Result<(), StoreError> {
    let marker = config.clear_request_path();
    if let Some(parent) = marker.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    fs::write(&marker, Local::now().to_rfc3339()).map_err(|e| StoreError::io(&marker, e))?;
    SnapshotStore::new(config.snapshot_path()).save(&AggregateStats::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ScriptedSource;

    fn config(dir: &tempfile::TempDir) -> Config {
        Config::with_data_path(dir.path().join("data"))
    }

    #[test]
    fn test_denied_capture_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::denied();
        let mut engine = Engine::start(config(&dir), source.clone()).unwrap();
        assert_eq!(engine.capture_state(), &CaptureState::PermissionDenied);

        source.grant_permission();
        assert_eq!(engine.retry_capture(), &CaptureState::Running);
        assert!(source.press(49));
        engine.shutdown();
        assert_eq!(engine.capture_state(), &CaptureState::Stopped);
        assert_eq!(engine.stats().total_count, 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::start(config(&dir), ScriptedSource::new()).unwrap();
        engine.shutdown();
        engine.shutdown();
        assert_eq!(engine.retry_capture(), &CaptureState::Stopped);
    }

    /// Types one key the moment it is attached and notes whether a clear
    /// request was still pending at that point.
    struct EagerSource {
        marker: PathBuf,
        marker_seen: Arc<std::sync::atomic::AtomicBool>,
    }

    impl EventSource for EagerSource {
        fn attach(&mut self, sink: crate::collector::EventSink) -> Result<(), CollectorError> {
            self.marker_seen
                .store(self.marker.exists(), std::sync::atomic::Ordering::SeqCst);
            sink.deliver(crate::collector::KeyEvent::now(49));
            Ok(())
        }

        fn detach(&mut self) {}
    }

    #[test]
    fn test_pending_clear_applies_before_capture() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let mut previous = Engine::start(config.clone(), ScriptedSource::new()).unwrap();
        previous.aggregator().record(0, Local::now());
        previous.shutdown();
        request_clear(&config).unwrap();

        let marker_seen = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let source = EagerSource {
            marker: config.clear_request_path(),
            marker_seen: marker_seen.clone(),
        };
        let mut engine = Engine::start(config, source).unwrap();
        assert_eq!(engine.startup_load(), &StartupLoad::Cleared);
        assert!(!marker_seen.load(std::sync::atomic::Ordering::SeqCst));

        engine.shutdown();
        let stats = engine.stats();
        assert_eq!(stats.total_count, 1);
        assert_eq!(stats.count_for(49), 1);
    }

    #[test]
    fn test_key_name_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::start(config(&dir), ScriptedSource::new()).unwrap();
        assert_eq!(engine.key_name(49), "Space");
        assert_eq!(engine.key_name(999), "Key #999");
    }
}
