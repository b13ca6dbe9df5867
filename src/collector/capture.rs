//! Capture lifecycle: attach a source and forward its events to the aggregator.
//!
//! The source's callback only enqueues. A dedicated forwarding thread drains the
//! queue in batches and folds them into the aggregator, so neither the lock nor
//! any I/O ever runs on the operating system's event-delivery context.

use crate::collector::source::{CollectorError, EventSink, EventSource};
use crate::collector::types::KeyEvent;
use crate::core::SharedAggregator;
use crate::health::SharedHealthLog;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Capacity of the queue between the event callback and the forwarder.
pub const CAPTURE_QUEUE_CAPACITY: usize = 10_000;

/// Largest batch folded under one lock acquisition.
const MAX_BATCH: usize = 256;

/// Owns an [`EventSource`] and the thread that forwards its events.
pub struct Capture<S: EventSource> {
    source: S,
    aggregator: SharedAggregator,
    health: Option<SharedHealthLog>,
    dropped: Arc<AtomicU64>,
    forwarder: Option<JoinHandle<()>>,
}

impl<S: EventSource> Capture<S> {
    /// Create a stopped capture.
    pub fn new(source: S, aggregator: SharedAggregator) -> Self {
        Self {
            source,
            aggregator,
            health: None,
            dropped: Arc::new(AtomicU64::new(0)),
            forwarder: None,
        }
    }

    /// Report forwarded and dropped events to `health`.
    pub fn with_health(mut self, health: SharedHealthLog) -> Self {
        self.health = Some(health);
        self
    }

    /// Attach to the source and start forwarding.
    ///
    /// Calling this while already running is a no-op.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.forwarder.is_some() {
            return Ok(());
        }

        let (sender, receiver) = bounded(CAPTURE_QUEUE_CAPACITY);
        self.source
            .attach(EventSink::new(sender, self.dropped.clone()))?;
        self.aggregator.begin_capture();

        let aggregator = self.aggregator.clone();
        let health = self.health.clone();
        let dropped = self.dropped.clone();
        let spawned = thread::Builder::new()
            .name("keytally-capture".to_string())
            .spawn(move || forward_events(receiver, aggregator, health, dropped));

        match spawned {
            Ok(handle) => {
                self.forwarder = Some(handle);
                info!("keyboard capture started");
                Ok(())
            }
            Err(e) => {
                self.source.detach();
                Err(CollectorError::CaptureFailed(e.to_string()))
            }
        }
    }

    /// Release the hook, fold everything already queued, then stop.
    pub fn stop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            self.source.detach();
            if handle.join().is_err() {
                warn!("capture forwarder panicked");
            }
            info!("keyboard capture stopped");
        }
    }

    /// Whether events are currently being forwarded.
    pub fn is_running(&self) -> bool {
        self.forwarder.is_some()
    }

    /// Events dropped because the queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: EventSource> Drop for Capture<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward_events(
    receiver: Receiver<KeyEvent>,
    aggregator: SharedAggregator,
    health: Option<SharedHealthLog>,
    dropped: Arc<AtomicU64>,
) {
    let mut batch = Vec::with_capacity(MAX_BATCH);

    // Ends once the source has dropped every sink and the queue is empty.
    while let Ok(first) = receiver.recv() {
        batch.push(first);
        while batch.len() < MAX_BATCH {
            match receiver.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }

        aggregator.record_batch(&batch);
        if let Some(ref health) = health {
            health.record_key_events(batch.len() as u64);
            health.set_dropped_events(dropped.load(Ordering::Relaxed));
        }
        batch.clear();
    }

    debug!("capture queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::scripted::ScriptedSource;
    use crate::core::create_shared_aggregator;
    use crate::health::create_shared_log;

    #[test]
    fn test_start_is_idempotent() {
        let source = ScriptedSource::new();
        let mut capture = Capture::new(source.clone(), create_shared_aggregator(51));

        capture.start().unwrap();
        capture.start().unwrap();
        assert!(capture.is_running());
        assert_eq!(source.attach_count(), 1);
    }

    #[test]
    fn test_stop_drains_queue() {
        let source = ScriptedSource::new();
        let aggregator = create_shared_aggregator(51);
        let health = create_shared_log();
        let mut capture = Capture::new(source.clone(), aggregator.clone()).with_health(health.clone());

        capture.start().unwrap();
        for key in 0..500u16 {
            assert!(source.press(key));
        }
        capture.stop();

        assert!(!capture.is_running());
        assert!(!source.is_attached());
        assert_eq!(aggregator.total_count(), 500);
        assert_eq!(health.stats().key_events, 500);
    }

    #[test]
    fn test_permission_denied_leaves_capture_stopped() {
        let source = ScriptedSource::denied();
        let aggregator = create_shared_aggregator(51);
        let mut capture = Capture::new(source.clone(), aggregator.clone());

        assert_eq!(capture.start(), Err(CollectorError::PermissionDenied));
        assert!(!capture.is_running());

        // Still loadable: capture never began
        assert!(aggregator.load(Default::default()));

        source.grant_permission();
        capture.start().unwrap();
        assert!(capture.is_running());
    }

    #[test]
    fn test_restart_after_stop() {
        let source = ScriptedSource::new();
        let aggregator = create_shared_aggregator(51);
        let mut capture = Capture::new(source.clone(), aggregator.clone());

        capture.start().unwrap();
        source.press(1);
        capture.stop();
        capture.start().unwrap();
        source.press(2);
        capture.stop();

        assert_eq!(aggregator.total_count(), 2);
        assert_eq!(source.attach_count(), 2);
    }
}
