//! Background timers: autosave and backup.
//!
//! Each timer runs on its own thread and is stopped by dropping its shutdown
//! sender, so file I/O never runs on the capture path.

pub mod autosave;
pub mod backup;

pub use autosave::{AutosaveScheduler, Persister};
pub use backup::{BackupScheduler, SharedBackupManager};
