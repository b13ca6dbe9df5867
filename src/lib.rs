//! keytally - background keystroke statistics.
//!
//! Observes system-wide key-down events, folds them into lifetime, hourly and
//! daily counters, and keeps those counters on disk with periodic autosave and
//! scheduled backups.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Engine                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │ EventSource │──▶│   Capture   │──▶│ Aggregator  │         │
//! │  │ (tap/hook)  │   │ (forwarder) │   │   (lock)    │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │                                             │ snapshot       │
//! │                                             ▼                │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │   Backup    │◀──│  Snapshot   │◀──│  Autosave   │         │
//! │  │  Scheduler  │   │    Store    │   │  Scheduler  │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use keytally::{collector::SystemSource, Config, DateRange, Engine};
//!
//! // Requires Input Monitoring permission on macOS
//! let mut engine = Engine::start(Config::load().unwrap_or_default(), SystemSource::new())
//!     .expect("failed to start engine");
//!
//! let today = engine.summary(DateRange::Today, 5);
//! println!("{} keystrokes today", today.total);
//!
//! engine.shutdown();
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod engine;
pub mod health;
pub mod scheduler;
pub mod storage;

// Re-export key types at crate root for convenience
pub use collector::{CollectorError, EventSource, KeyEvent, KeyId, ScriptedSource};
pub use config::{Config, ConfigError};
pub use core::{AggregateStats, DateRange, RangeSummary, StatAggregator};
pub use engine::{request_clear, CaptureState, Engine, EngineError, StartupLoad};
pub use health::{HealthLog, HealthStats, SharedHealthLog};
pub use storage::{
    BackupInterval, BackupOutcome, BackupSettings, ExportFormat, LoadOutcome, SnapshotStore,
    StoreError,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Steps for granting the capture permission, shown when capture is denied.
#[cfg(target_os = "macos")]
pub const PERMISSION_INSTRUCTIONS: &str = "\
To grant permission:
1. Open System Settings > Privacy & Security
2. Select 'Input Monitoring'
3. Enable the application running keytally (e.g. your terminal)
keytally keeps retrying and starts counting as soon as access is granted.";

/// Steps for granting the capture permission, shown when capture is denied.
#[cfg(not(target_os = "macos"))]
pub const PERMISSION_INSTRUCTIONS: &str = "\
The system refused to install a global keyboard hook.
Check that no security policy blocks low-level keyboard hooks for this user.
keytally keeps retrying and starts counting as soon as the hook can be installed.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_instructions_are_actionable() {
        assert!(PERMISSION_INSTRUCTIONS.contains("retrying"));
        assert!(!VERSION.is_empty());
    }
}
