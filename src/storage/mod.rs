//! Persistence: the primary snapshot, its backups, and user exports.

pub mod backup;
pub mod report;
pub mod snapshot;

pub use backup::{
    list_backups, read_last_backup_at, BackupInterval, BackupManager, BackupOutcome,
    BackupSettings,
};
pub use report::{format_summary, render_report};
pub use snapshot::{ExportFormat, LoadOutcome, SnapshotStore, StoreError, SNAPSHOT_VERSION};
