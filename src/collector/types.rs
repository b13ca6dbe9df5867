//! Event types produced by the capture layer.
//!
//! A [`KeyEvent`] lives only long enough to be folded into the aggregate; it is
//! never persisted as a list.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Identifier of a physical key, in the macOS virtual key-code space.
///
/// Platform sources that use a different numbering translate into this space so
/// that snapshots written on one machine read the same on another.
pub type KeyId = u16;

/// Key identifier of the space bar.
pub const SPACE_KEY_ID: KeyId = 49;

/// Key identifier of the delete (backspace) key.
pub const DELETE_KEY_ID: KeyId = 51;

/// A single key-down occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Which key went down
    pub key_id: KeyId,
    /// Local wall-clock time of the key-down
    pub occurred_at: DateTime<Local>,
}

impl KeyEvent {
    /// Create an event stamped with the current time.
    pub fn now(key_id: KeyId) -> Self {
        Self {
            key_id,
            occurred_at: Local::now(),
        }
    }

    /// Create an event with an explicit timestamp.
    pub fn at(key_id: KeyId, occurred_at: DateTime<Local>) -> Self {
        Self {
            key_id,
            occurred_at,
        }
    }
}
