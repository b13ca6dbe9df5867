//! Health module for the keystroke engine.
//!
//! Counts what the engine itself did during a session so failures that are
//! recovered silently (dropped events, failed saves) stay visible.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, HealthLog, HealthStats,
    SharedHealthLog,
};
