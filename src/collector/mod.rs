//! Event collection module for the keystroke engine.
//!
//! Platform sources attach to the system-wide keyboard stream and push
//! key-down events into a bounded queue; [`Capture`] drains that queue into the
//! aggregator.

pub mod capture;
pub mod scripted;
pub mod source;
pub mod types;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub mod noop;

// Re-export commonly used types
pub use capture::{Capture, CAPTURE_QUEUE_CAPACITY};
pub use scripted::ScriptedSource;
pub use source::{CollectorError, EventSink, EventSource};
pub use types::{KeyEvent, KeyId, DELETE_KEY_ID, SPACE_KEY_ID};

#[cfg(target_os = "macos")]
pub use macos::{check_permission, MacOSTap};

/// Platform-agnostic system source type alias
#[cfg(target_os = "macos")]
pub type SystemSource = MacOSTap;

#[cfg(target_os = "windows")]
pub use self::windows::{check_permission, WindowsHook};

/// Platform-agnostic system source type alias
#[cfg(target_os = "windows")]
pub type SystemSource = WindowsHook;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub use noop::{check_permission, NoopSource};

/// Platform-agnostic system source type alias
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub type SystemSource = NoopSource;
