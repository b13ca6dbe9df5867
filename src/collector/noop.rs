//! Fallback event source for targets without a supported global hook.
//!
//! This exists so the crate (and binary) can compile on targets other than
//! macOS and Windows without pulling in platform bindings.

use crate::collector::source::{CollectorError, EventSink, EventSource};
use tracing::warn;

/// A source that attaches successfully but never emits events.
#[derive(Debug, Default)]
pub struct NoopSource {
    sink: Option<EventSink>,
}

impl NoopSource {
    /// Create a new noop source.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSource for NoopSource {
    fn attach(&mut self, sink: EventSink) -> Result<(), CollectorError> {
        warn!("global keyboard capture is not supported on this platform; no events will be recorded");
        self.sink = Some(sink);
        Ok(())
    }

    fn detach(&mut self) {
        self.sink = None;
    }
}

/// There is no input-monitoring permission gate on these targets.
pub fn check_permission() -> bool {
    true
}
