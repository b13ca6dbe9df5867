//! A synthetic event source driven by code instead of the keyboard.
//!
//! Used by tests and demos to exercise the engine without a system hook.
//! Clones share state, so a test can keep one handle to press keys while the
//! engine owns the other.

use crate::collector::source::{CollectorError, EventSink, EventSource};
use crate::collector::types::{KeyEvent, KeyId};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
struct ScriptedState {
    sink: Option<EventSink>,
    permission_granted: bool,
    attach_count: usize,
}

/// An [`EventSource`] whose key presses are issued programmatically.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedSource {
    /// A source that attaches successfully.
    pub fn new() -> Self {
        Self::with_permission(true)
    }

    /// A source that refuses to attach until [`grant_permission`](Self::grant_permission).
    pub fn denied() -> Self {
        Self::with_permission(false)
    }

    fn with_permission(permission_granted: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptedState {
                sink: None,
                permission_granted,
                attach_count: 0,
            })),
        }
    }

    /// Let later `attach` calls succeed.
    pub fn grant_permission(&self) {
        self.state.lock().permission_granted = true;
    }

    /// Make later `attach` calls fail with `PermissionDenied`.
    pub fn revoke_permission(&self) {
        self.state.lock().permission_granted = false;
    }

    /// Press a key now. Returns whether the event was accepted.
    pub fn press(&self, key_id: KeyId) -> bool {
        self.emit(KeyEvent::now(key_id))
    }

    /// Press a key with an explicit timestamp.
    pub fn press_at(&self, key_id: KeyId, at: DateTime<Local>) -> bool {
        self.emit(KeyEvent::at(key_id, at))
    }

    /// Deliver an event as the platform callback would.
    pub fn emit(&self, event: KeyEvent) -> bool {
        match self.state.lock().sink {
            Some(ref sink) => sink.deliver(event),
            None => false,
        }
    }

    /// Whether a capture currently holds the sink.
    pub fn is_attached(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    /// How many times the source has been attached.
    pub fn attach_count(&self) -> usize {
        self.state.lock().attach_count
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for ScriptedSource {
    fn attach(&mut self, sink: EventSink) -> Result<(), CollectorError> {
        let mut state = self.state.lock();
        if !state.permission_granted {
            return Err(CollectorError::PermissionDenied);
        }
        state.sink = Some(sink);
        state.attach_count += 1;
        Ok(())
    }

    fn detach(&mut self) {
        self.state.lock().sink = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_press_without_attach_is_ignored() {
        let source = ScriptedSource::new();
        assert!(!source.press(1));
    }

    #[test]
    fn test_denied_until_granted() {
        let mut source = ScriptedSource::denied();
        let (tx, rx) = bounded(8);
        let sink = EventSink::new(tx, Arc::new(AtomicU64::new(0)));

        assert_eq!(
            source.attach(sink.clone()),
            Err(CollectorError::PermissionDenied)
        );
        source.grant_permission();
        source.attach(sink).unwrap();
        assert!(source.press(49));
        assert_eq!(rx.try_recv().unwrap().key_id, 49);
    }
}
