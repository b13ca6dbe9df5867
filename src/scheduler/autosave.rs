//! Periodic persistence of the live aggregate.

use crate::core::SharedAggregator;
use crate::health::SharedHealthLog;
use crate::storage::{SnapshotStore, StoreError};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Takes snapshots of the aggregator and writes them to the store.
///
/// Every path that persists (timer, shutdown, clear, manual save) goes through
/// here, and the snapshot is taken while holding the persist lock, so an older
/// snapshot can never overwrite a newer one on disk.
#[derive(Debug)]
pub struct Persister {
    aggregator: SharedAggregator,
    store: Arc<SnapshotStore>,
    health: SharedHealthLog,
    last_saved: Mutex<Option<u64>>,
}

impl Persister {
    /// Create a persister that has not written anything yet.
    pub fn new(
        aggregator: SharedAggregator,
        store: Arc<SnapshotStore>,
        health: SharedHealthLog,
    ) -> Self {
        Self {
            aggregator,
            store,
            health,
            last_saved: Mutex::new(None),
        }
    }

    /// Record that the store already holds the state at `revision`.
    pub fn mark_saved(&self, revision: u64) {
        *self.last_saved.lock() = Some(revision);
    }

    /// The store snapshots are written to.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Write the current aggregate unless it is unchanged since the last write.
    /// Returns whether anything was written.
    pub fn persist(&self) -> Result<bool, StoreError> {
        let mut last_saved = self.last_saved.lock();
        let (stats, revision) = self.aggregator.snapshot_with_revision();
        if *last_saved == Some(revision) {
            return Ok(false);
        }

        match self.store.save(&stats) {
            Ok(()) => {
                *last_saved = Some(revision);
                self.health.record_save();
                Ok(true)
            }
            Err(e) => {
                self.health.record_save_failure();
                Err(e)
            }
        }
    }

    /// [`persist`](Self::persist), logging instead of returning failures.
    pub fn persist_logged(&self) {
        match self.persist() {
            Ok(true) => debug!("autosave wrote snapshot"),
            Ok(false) => debug!("autosave skipped; nothing changed"),
            Err(e) => warn!(error = %e, "autosave failed; will retry on the next tick"),
        }
    }
}

/// Runs [`Persister::persist`] on a fixed period on its own thread.
pub struct AutosaveScheduler {
    persister: Arc<Persister>,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AutosaveScheduler {
    /// Start the timer.
    pub fn spawn(persister: Arc<Persister>, interval: Duration) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let worker = persister.clone();
        let handle = thread::Builder::new()
            .name("keytally-autosave".to_string())
            .spawn(move || run(worker, interval, shutdown_rx))?;

        info!(interval_secs = interval.as_secs(), "autosave scheduled");
        Ok(Self {
            persister,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Persist now, on the caller's thread.
    pub fn flush(&self) -> Result<bool, StoreError> {
        self.persister.persist()
    }

    /// Whether the timer thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the timer. Does not save; callers flush afterwards.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the worker
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("autosave worker panicked");
            }
        }
    }
}

impl Drop for AutosaveScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(persister: Arc<Persister>, interval: Duration, shutdown: Receiver<()>) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => persister.persist_logged(),
            recv(shutdown) -> _ => break,
        }
    }
    debug!("autosave worker stopped");
}
