//! Durable representation of the aggregate as a single JSON document.
//!
//! Writes go to a unique sibling temporary file which is fsynced and then renamed over
//! the target, so an interrupted save leaves either the previous snapshot or the
//! new one on disk, never a partial file.

use crate::core::AggregateStats;
use crate::storage::report::render_report;
use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Current on-disk document version.
pub const SNAPSHOT_VERSION: u32 = 1;

fn default_version() -> u32 {
    1
}

/// Errors raised by snapshot, backup and export I/O.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Serialize)]
struct SnapshotDocumentRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    stats: &'a AggregateStats,
}

#[derive(Deserialize)]
struct SnapshotDocument {
    #[serde(default = "default_version")]
    version: u32,
    stats: AggregateStats,
}

/// What [`SnapshotStore::load`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A valid snapshot was read.
    Loaded(AggregateStats),
    /// No snapshot exists yet.
    NotFound,
    /// The snapshot was undecodable and has been moved aside.
    Recovered { quarantined: PathBuf },
}

impl LoadOutcome {
    /// The stats to start from: the loaded snapshot, or empty.
    pub fn into_stats(self) -> AggregateStats {
        match self {
            LoadOutcome::Loaded(stats) => stats,
            LoadOutcome::NotFound | LoadOutcome::Recovered { .. } => AggregateStats::default(),
        }
    }
}

/// Output format for user-initiated exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Same document schema as the primary snapshot
    Json,
    /// Flattened human-readable text report
    Report,
}

impl ExportFormat {
    /// File extension used for exports in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Report => "txt",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "report" | "text" | "txt" => Ok(ExportFormat::Report),
            other => Err(format!("unknown export format '{other}' (use json or report)")),
        }
    }
}

/// Reads and writes the snapshot file at a fixed path.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Create a store for the snapshot at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the primary snapshot.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a primary snapshot exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the snapshot.
    ///
    /// A missing file is [`LoadOutcome::NotFound`]. An undecodable file is renamed
    /// to `<name>.corrupt-<timestamp>` and reported as [`LoadOutcome::Recovered`],
    /// so a later save cannot destroy it.
    pub fn load(&self) -> Result<LoadOutcome, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LoadOutcome::NotFound),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        match decode(&bytes) {
            Ok(stats) => {
                if let Err(reason) = stats.check_consistency() {
                    warn!(path = %self.path.display(), %reason, "loaded snapshot is inconsistent; keeping it as-is");
                }
                debug!(path = %self.path.display(), total = stats.total_count, "snapshot loaded");
                Ok(LoadOutcome::Loaded(stats))
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot is corrupt; moving it aside");
                let quarantined = self.quarantine()?;
                Ok(LoadOutcome::Recovered { quarantined })
            }
        }
    }

    /// Read the snapshot without recovering from corruption.
    ///
    /// For inspection from another process; a corrupt file is reported as
    /// [`StoreError::Corrupt`] and left in place.
    pub fn read(&self) -> Result<Option<AggregateStats>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => decode(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    path: self.path.clone(),
                    source,
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    /// Atomically replace the snapshot with `stats`.
    pub fn save(&self, stats: &AggregateStats) -> Result<(), StoreError> {
        let bytes = encode(stats)?;
        let _guard = self.write_lock.lock();
        write_atomically(&self.path, &bytes)?;
        debug!(path = %self.path.display(), total = stats.total_count, "snapshot saved");
        Ok(())
    }

    /// Write a copy of `stats` for the user.
    ///
    /// When `destination` is an existing directory a timestamped file name is
    /// chosen inside it. The primary snapshot is never touched. Returns the path
    /// written.
    pub fn export(
        &self,
        stats: &AggregateStats,
        destination: &Path,
        format: ExportFormat,
    ) -> Result<PathBuf, StoreError> {
        let target = if destination.is_dir() {
            destination.join(format!(
                "keytally_export_{}.{}",
                Local::now().format("%Y%m%d_%H%M%S"),
                format.extension()
            ))
        } else {
            destination.to_path_buf()
        };

        if target == self.path {
            return Err(StoreError::io(
                &target,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "export destination is the primary snapshot",
                ),
            ));
        }

        let bytes = match format {
            ExportFormat::Json => encode(stats)?,
            ExportFormat::Report => render_report(stats, Local::now().date_naive()).into_bytes(),
        };
        write_atomically(&target, &bytes)?;
        info!(path = %target.display(), "snapshot exported");
        Ok(target)
    }

    fn quarantine(&self) -> Result<PathBuf, StoreError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        let stamp = Local::now().format("%Y%m%d-%H%M%S");

        let mut quarantined = self.path.with_file_name(format!("{file_name}.corrupt-{stamp}"));
        let mut n = 1;
        while quarantined.exists() {
            quarantined = self
                .path
                .with_file_name(format!("{file_name}.corrupt-{stamp}-{n}"));
            n += 1;
        }

        fs::rename(&self.path, &quarantined).map_err(|e| StoreError::io(&self.path, e))?;
        Ok(quarantined)
    }
}

/// Decode a snapshot document.
pub fn decode(bytes: &[u8]) -> Result<AggregateStats, serde_json::Error> {
    let document: SnapshotDocument = serde_json::from_slice(bytes)?;
    if document.version > SNAPSHOT_VERSION {
        warn!(
            version = document.version,
            "snapshot was written by a newer version"
        );
    }
    Ok(document.stats)
}

/// Encode a snapshot document.
pub fn encode(stats: &AggregateStats) -> Result<Vec<u8>, serde_json::Error> {
    let document = SnapshotDocumentRef {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        stats,
    };
    let mut bytes = serde_json::to_vec_pretty(&document)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Write `bytes` to a uniquely named sibling temporary file, fsync, then rename
/// it over `path`.
///
/// The temporary name is unique per call, so concurrent writers (including
/// other processes) never share a partial file.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            parent
        }
        None => Path::new("."),
    };

    let prefix = tmp_prefix(path);
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| StoreError::io(parent, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    // On failure the temporary file is removed when the error drops it
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Temporary names look like `.snapshot.json.XXXXXX.tmp`.
fn tmp_prefix(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{name}.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> AggregateStats {
        let mut stats = AggregateStats::new();
        for (h, key) in [(9, 49u16), (9, 51), (13, 0)] {
            let at = Local.with_ymd_and_hms(2024, 6, 12, h, 30, 0).unwrap();
            stats.fold(key, &at, key == 51);
        }
        stats
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        assert_eq!(store.load().unwrap(), LoadOutcome::NotFound);
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        let stats = sample();

        store.save(&stats).unwrap();
        assert_eq!(store.load().unwrap(), LoadOutcome::Loaded(stats));
    }

    #[test]
    fn test_round_trip_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));

        store.save(&AggregateStats::default()).unwrap();
        assert_eq!(
            store.load().unwrap(),
            LoadOutcome::Loaded(AggregateStats::default())
        );
    }

    #[test]
    fn test_document_layout() {
        let bytes = encode(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["stats"]["total_count"], 3);
        assert_eq!(value["stats"]["key_frequency"]["49"], 1);
        assert_eq!(value["stats"]["daily_count"]["2024-06-12"], 3);
        assert_eq!(value["stats"]["hourly_count"]["2024-06-12T09:00:00"], 2);
        assert_eq!(value["stats"]["hourly_delete_count"]["2024-06-12T09:00:00"], 1);
    }

    #[test]
    fn test_corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        fs::write(&path, b"{\"stats\": {\"total_count\": ").unwrap();
        let store = SnapshotStore::new(&path);

        let outcome = store.load().unwrap();
        let quarantined = match outcome {
            LoadOutcome::Recovered { quarantined } => quarantined,
            other => panic!("expected recovery, got {other:?}"),
        };
        assert!(!path.exists());
        assert_eq!(
            fs::read(&quarantined).unwrap(),
            b"{\"stats\": {\"total_count\": ".to_vec()
        );

        // The next save does not clobber the preserved file
        store.save(&sample()).unwrap();
        assert!(quarantined.exists());
    }

    #[test]
    fn test_read_leaves_corrupt_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = SnapshotStore::new(&path);
        assert_eq!(store.read().unwrap(), None);

        fs::write(&path, b"not json").unwrap();
        assert!(matches!(store.read(), Err(StoreError::Corrupt { .. })));
        assert!(path.exists());
    }

    #[test]
    fn test_leftover_tmp_does_not_affect_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = SnapshotStore::new(&path);
        let stats = sample();
        store.save(&stats).unwrap();

        // A crash mid-write leaves a partial temporary file beside the target
        let partial = dir.path().join(".snapshot.json.a1b2c3.tmp");
        fs::write(partial, b"{\"version\":1,\"sta").unwrap();
        assert_eq!(store.load().unwrap(), LoadOutcome::Loaded(stats.clone()));

        store.save(&AggregateStats::default()).unwrap();
        assert_eq!(
            store.load().unwrap(),
            LoadOutcome::Loaded(AggregateStats::default())
        );
    }

    #[test]
    fn test_concurrent_stores_never_expose_partial_file() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let mut large = AggregateStats::new();
        let at = Local.with_ymd_and_hms(2024, 6, 12, 9, 0, 0).unwrap();
        for key in 0..20_000u16 {
            large.fold(key, &at, false);
        }
        SnapshotStore::new(&path).save(&large).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writers: Vec<_> = [large, AggregateStats::default()]
            .into_iter()
            .map(|stats| {
                let store = SnapshotStore::new(&path);
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|_| store.save(&stats).is_err())
                        .count()
                })
            })
            .collect();
        let reader = {
            let store = SnapshotStore::new(&path);
            let done = done.clone();
            std::thread::spawn(move || {
                let mut corrupt = 0;
                while !done.load(Ordering::SeqCst) {
                    if let Err(StoreError::Corrupt { .. }) = store.read() {
                        corrupt += 1;
                    }
                }
                corrupt
            })
        };

        let failed: Vec<usize> = writers.into_iter().map(|w| w.join().unwrap()).collect();
        done.store(true, Ordering::SeqCst);
        assert_eq!(failed, vec![0, 0]);
        assert_eq!(reader.join().unwrap(), 0);

        // Only the target remains; no temporary files are left behind
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("snapshot.json")]);
    }

    #[test]
    fn test_export_to_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        let stats = sample();
        store.save(&stats).unwrap();
        let before = fs::read(store.path()).unwrap();

        let exports = dir.path().join("exports");
        fs::create_dir_all(&exports).unwrap();
        let json = store.export(&stats, &exports, ExportFormat::Json).unwrap();
        assert_eq!(json.parent(), Some(exports.as_path()));
        assert_eq!(decode(&fs::read(&json).unwrap()).unwrap(), stats);

        let report = store
            .export(&stats, &dir.path().join("report.txt"), ExportFormat::Report)
            .unwrap();
        assert!(fs::read_to_string(report).unwrap().contains("Total keystrokes"));

        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_export_refuses_primary_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = SnapshotStore::new(&path);
        assert!(store
            .export(&sample(), &path, ExportFormat::Json)
            .is_err());
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("json".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert_eq!("Report".parse::<ExportFormat>(), Ok(ExportFormat::Report));
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
