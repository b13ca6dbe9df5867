//! Timestamped copies of the primary snapshot.
//!
//! A backup is due when backups are enabled and at least one interval has passed
//! since the last one. Changing the interval or toggling backups moves the last
//! backup time to "now", so the next backup waits a full interval instead of
//! firing immediately. The last backup time and the settings it was measured
//! against live in a small state file, so the policy holds across restarts.

use crate::storage::snapshot::{write_atomically, StoreError};
use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BACKUP_PREFIX: &str = "snapshot_";
const BACKUP_EXTENSION: &str = "json";

/// Allowed spacing between backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BackupInterval {
    Daily,
    EveryThreeDays,
    Weekly,
}

impl BackupInterval {
    /// Interval length in days.
    pub fn days(&self) -> u8 {
        match self {
            BackupInterval::Daily => 1,
            BackupInterval::EveryThreeDays => 3,
            BackupInterval::Weekly => 7,
        }
    }

    /// Interval length as a duration.
    pub fn duration(&self) -> Duration {
        Duration::days(self.days() as i64)
    }
}

impl TryFrom<u8> for BackupInterval {
    type Error = String;

    fn try_from(days: u8) -> Result<Self, Self::Error> {
        match days {
            1 => Ok(BackupInterval::Daily),
            3 => Ok(BackupInterval::EveryThreeDays),
            7 => Ok(BackupInterval::Weekly),
            other => Err(format!("backup interval must be 1, 3 or 7 days, got {other}")),
        }
    }
}

impl From<BackupInterval> for u8 {
    fn from(interval: BackupInterval) -> Self {
        interval.days()
    }
}

impl fmt::Display for BackupInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupInterval::Daily => write!(f, "daily"),
            other => write!(f, "every {} days", other.days()),
        }
    }
}

/// User-facing backup configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub enabled: bool,
    pub interval_days: BackupInterval,
    /// Keep at most this many backups; `None` keeps all of them.
    pub retain: Option<usize>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_days: BackupInterval::Weekly,
            retain: None,
        }
    }
}

impl BackupSettings {
    /// Whether switching from `self` to `other` restarts the interval.
    fn resets_schedule(&self, other: &BackupSettings) -> bool {
        self.enabled != other.enabled || self.interval_days != other.interval_days
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct BackupState {
    last_backup_at: Option<DateTime<Utc>>,
    settings: Option<BackupSettings>,
}

/// Result of a scheduled backup check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Disabled,
    NotDue { next_due: DateTime<Utc> },
    /// No primary snapshot exists yet.
    NothingToBackUp,
    Created(PathBuf),
}

/// Applies the backup policy and manages the backup directory.
#[derive(Debug)]
pub struct BackupManager {
    snapshot_path: PathBuf,
    backup_dir: PathBuf,
    state_path: PathBuf,
    settings: BackupSettings,
    state: BackupState,
}

impl BackupManager {
    /// Load persisted state and reconcile it with `settings`.
    ///
    /// Settings that differ from the ones last applied (for example edited while
    /// nothing was running) restart the interval at `now`.
    pub fn open(
        snapshot_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        settings: BackupSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let state_path = state_path.into();
        let state = read_state(&state_path);
        let mut manager = Self {
            snapshot_path: snapshot_path.into(),
            backup_dir: backup_dir.into(),
            state_path,
            settings,
            state,
        };
        manager.apply_settings(settings, now);
        manager
    }

    /// Settings currently in force.
    pub fn settings(&self) -> BackupSettings {
        self.settings
    }

    /// Directory backups are written to.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// When the last backup was taken, if ever.
    pub fn last_backup_at(&self) -> Option<DateTime<Utc>> {
        self.state.last_backup_at
    }

    /// Install new settings. Returns `true` if the schedule was reset.
    pub fn apply_settings(&mut self, settings: BackupSettings, now: DateTime<Utc>) -> bool {
        self.settings = settings;
        let previous = self.state.settings;
        if previous == Some(settings) {
            return false;
        }

        let reset = previous.is_some_and(|p| p.resets_schedule(&settings));
        if reset {
            self.state.last_backup_at = Some(now);
            info!(
                enabled = settings.enabled,
                interval = %settings.interval_days,
                "backup settings changed; next backup deferred by a full interval"
            );
        }
        self.state.settings = Some(settings);
        self.persist_state();
        reset
    }

    /// When the next backup becomes due, if backups are enabled.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        if !self.settings.enabled {
            return None;
        }
        Some(match self.state.last_backup_at {
            Some(last) => last + self.settings.interval_days.duration(),
            None => DateTime::<Utc>::MIN_UTC,
        })
    }

    /// Whether a backup should be taken at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due().is_some_and(|due| now >= due)
    }

    /// Back up the snapshot if the policy says so.
    pub fn run_if_due(&mut self, now: DateTime<Utc>) -> Result<BackupOutcome, StoreError> {
        match self.next_due() {
            None => Ok(BackupOutcome::Disabled),
            Some(next_due) if now < next_due => Ok(BackupOutcome::NotDue { next_due }),
            Some(_) => self.backup_now(now),
        }
    }

    /// Copy the snapshot into the backup directory regardless of schedule.
    ///
    /// Nothing is recorded when there is no snapshot yet, so the backup stays due.
    pub fn backup_now(&mut self, now: DateTime<Utc>) -> Result<BackupOutcome, StoreError> {
        if !self.snapshot_path.exists() {
            debug!(path = %self.snapshot_path.display(), "no snapshot to back up yet");
            return Ok(BackupOutcome::NothingToBackUp);
        }

        fs::create_dir_all(&self.backup_dir).map_err(|e| StoreError::io(&self.backup_dir, e))?;
        let target = self.next_backup_path(now);
        let bytes =
            fs::read(&self.snapshot_path).map_err(|e| StoreError::io(&self.snapshot_path, e))?;
        write_atomically(&target, &bytes)?;

        self.state.last_backup_at = Some(now);
        self.persist_state();
        info!(path = %target.display(), "snapshot backed up");

        if let Err(e) = self.prune() {
            warn!(error = %e, "failed to prune old backups");
        }
        Ok(BackupOutcome::Created(target))
    }

    /// Existing backups, oldest first.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>, StoreError> {
        list_backups(&self.backup_dir)
    }

    /// Delete the oldest backups beyond the retention limit. Returns how many
    /// were removed.
    pub fn prune(&self) -> Result<usize, StoreError> {
        // Zero would delete the backup just written
        let Some(retain) = self.settings.retain.filter(|n| *n > 0) else {
            return Ok(0);
        };
        let backups = self.list_backups()?;
        let excess = backups.len().saturating_sub(retain);
        for path in &backups[..excess] {
            fs::remove_file(path).map_err(|e| StoreError::io(path, e))?;
            debug!(path = %path.display(), "pruned backup");
        }
        Ok(excess)
    }

    fn next_backup_path(&self, now: DateTime<Utc>) -> PathBuf {
        let stamp = now.with_timezone(&Local).format("%Y-%m-%d_%H-%M-%S");
        let mut path = self
            .backup_dir
            .join(format!("{BACKUP_PREFIX}{stamp}.{BACKUP_EXTENSION}"));
        let mut n = 1;
        while path.exists() {
            path = self
                .backup_dir
                .join(format!("{BACKUP_PREFIX}{stamp}_{n}.{BACKUP_EXTENSION}"));
            n += 1;
        }
        path
    }

    fn persist_state(&self) {
        let result = serde_json::to_vec_pretty(&self.state)
            .map_err(StoreError::from)
            .and_then(|bytes| write_atomically(&self.state_path, &bytes));
        if let Err(e) = result {
            warn!(error = %e, "failed to persist backup state");
        }
    }
}

/// Backups in `backup_dir`, oldest first.
pub fn list_backups(backup_dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(backup_dir, e)),
    };

    let mut backups: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_backup_file(path))
        .collect();
    // Names embed a sortable timestamp
    backups.sort();
    Ok(backups)
}

/// The last backup time recorded in the state file at `state_path`.
pub fn read_last_backup_at(state_path: &Path) -> Option<DateTime<Utc>> {
    read_state(state_path).last_backup_at
}

fn is_backup_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.starts_with(BACKUP_PREFIX)
        && path.extension().and_then(|e| e.to_str()) == Some(BACKUP_EXTENSION)
}

fn read_state(path: &Path) -> BackupState {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "backup state unreadable; starting fresh");
            BackupState::default()
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => BackupState::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read backup state");
            BackupState::default()
        }
    }
}
