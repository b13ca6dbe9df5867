//! The seam between a privileged system event stream and the rest of the engine.

use crate::collector::types::KeyEvent;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while attaching to an event stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectorError {
    /// The operating environment refused global input observation.
    /// Retryable once the user grants the privilege.
    #[error("Input Monitoring permission not granted")]
    PermissionDenied,
    /// The hook was created but could not be wired into an event loop.
    #[error("Failed to start capture: {0}")]
    CaptureFailed(String),
}

/// Write side of the capture queue handed to an [`EventSource`].
///
/// Delivery never blocks: when the queue is full the event is dropped and
/// counted, so a slow consumer cannot stall the operating system's callback.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Sender<KeyEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    pub(crate) fn new(sender: Sender<KeyEvent>, dropped: Arc<AtomicU64>) -> Self {
        Self { sender, dropped }
    }

    /// Enqueue an event. Returns `false` if it was not accepted.
    pub fn deliver(&self, event: KeyEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// A system-wide source of key-down events.
///
/// Implementations own the platform hook. `attach` must either fail without
/// leaving anything installed, or start delivering into `sink`; `detach` must
/// release the hook and drop every clone of the sink so the consumer sees the
/// end of the stream.
pub trait EventSource: Send {
    fn attach(&mut self, sink: EventSink) -> Result<(), CollectorError>;

    fn detach(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_sink_counts_drops_when_full() {
        let (tx, rx) = bounded(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let sink = EventSink::new(tx, dropped.clone());

        assert!(sink.deliver(KeyEvent::now(1)));
        assert!(!sink.deliver(KeyEvent::now(2)));
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().map(|e| e.key_id), Ok(1));
    }

    #[test]
    fn test_sink_disconnected_is_not_a_drop() {
        let (tx, rx) = bounded(4);
        drop(rx);
        let dropped = Arc::new(AtomicU64::new(0));
        let sink = EventSink::new(tx, dropped.clone());

        assert!(!sink.deliver(KeyEvent::now(1)));
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }
}
