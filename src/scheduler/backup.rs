//! Coarse recurring timer driving [`BackupManager`].

use crate::health::SharedHealthLog;
use crate::storage::{BackupManager, BackupOutcome, BackupSettings};
use chrono::Utc;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backup manager shared between the timer and settings changes.
pub type SharedBackupManager = Arc<Mutex<BackupManager>>;

/// Checks whether a backup is due once at start and then every
/// `check_interval`.
pub struct BackupScheduler {
    manager: SharedBackupManager,
    health: SharedHealthLog,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackupScheduler {
    /// Start the timer. Checks once immediately, then every `check_interval`.
    pub fn spawn(
        manager: SharedBackupManager,
        health: SharedHealthLog,
        check_interval: Duration,
    ) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let worker_manager = manager.clone();
        let worker_health = health.clone();
        let handle = thread::Builder::new()
            .name("keytally-backup".to_string())
            .spawn(move || run(worker_manager, worker_health, check_interval, shutdown_rx))?;

        info!(check_secs = check_interval.as_secs(), "backup checks scheduled");
        Ok(Self {
            manager,
            health,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// The manager the timer drives.
    pub fn manager(&self) -> &SharedBackupManager {
        &self.manager
    }

    /// Run a check on the caller's thread.
    pub fn check_now(&self) -> Option<BackupOutcome> {
        check(&self.manager, &self.health)
    }

    /// Install new settings; see [`BackupManager::apply_settings`].
    pub fn apply_settings(&self, settings: BackupSettings) -> bool {
        self.manager.lock().apply_settings(settings, Utc::now())
    }

    /// Whether the timer thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the timer and join its thread.
    pub fn stop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("backup worker panicked");
            }
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    manager: SharedBackupManager,
    health: SharedHealthLog,
    check_interval: Duration,
    shutdown: Receiver<()>,
) {
    check(&manager, &health);

    let ticker = tick(check_interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                check(&manager, &health);
            }
            recv(shutdown) -> _ => break,
        }
    }
    debug!("backup worker stopped");
}

fn check(manager: &SharedBackupManager, health: &SharedHealthLog) -> Option<BackupOutcome> {
    let result = manager.lock().run_if_due(Utc::now());
    match result {
        Ok(outcome) => {
            match &outcome {
                BackupOutcome::Created(_) => health.record_backup(),
                BackupOutcome::NotDue { next_due } => debug!(%next_due, "backup not due"),
                BackupOutcome::NothingToBackUp | BackupOutcome::Disabled => {}
            }
            Some(outcome)
        }
        Err(e) => {
            warn!(error = %e, "backup failed; will retry on the next check");
            health.record_backup_failure();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::create_shared_log;
    use crate::storage::BackupInterval;

    fn shared_manager(dir: &tempfile::TempDir, enabled: bool) -> SharedBackupManager {
        std::fs::write(dir.path().join("snapshot.json"), b"{\"stats\":{}}").unwrap();
        Arc::new(Mutex::new(BackupManager::open(
            dir.path().join("snapshot.json"),
            dir.path().join("backups"),
            dir.path().join("backup_state.json"),
            BackupSettings {
                enabled,
                interval_days: BackupInterval::Daily,
                retain: None,
            },
            Utc::now(),
        )))
    }

    #[test]
    fn test_checks_once_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let manager = shared_manager(&dir, true);
        let health = create_shared_log();

        let mut scheduler =
            BackupScheduler::spawn(manager.clone(), health.clone(), Duration::from_secs(3600))
                .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while health.stats().backups_created == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        scheduler.stop();

        assert_eq!(health.stats().backups_created, 1);
        assert_eq!(manager.lock().list_backups().unwrap().len(), 1);
    }

    #[test]
    fn test_settings_change_defers() {
        let dir = tempfile::tempdir().unwrap();
        let manager = shared_manager(&dir, false);
        let health = create_shared_log();
        let scheduler =
            BackupScheduler::spawn(manager, health.clone(), Duration::from_secs(3600)).unwrap();

        assert!(scheduler.apply_settings(BackupSettings {
            enabled: true,
            interval_days: BackupInterval::Daily,
            retain: None,
        }));
        assert!(matches!(
            scheduler.check_now(),
            Some(BackupOutcome::NotDue { .. })
        ));
        assert_eq!(health.stats().backups_created, 0);
    }
}
