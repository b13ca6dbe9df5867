//! macOS event source using a CGEvent tap.
//!
//! Captures key-down events at the session level. The tap is listen-only, so
//! events continue to the rest of the system unmodified. It requires Input
//! Monitoring permission.

use crate::collector::source::{CollectorError, EventSink, EventSource};
use crate::collector::types::KeyEvent;
use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    CallbackResult, EventField,
};
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// The macOS event source using a CGEvent tap.
pub struct MacOSTap {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl MacOSTap {
    /// Create a detached tap.
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Check if the tap thread is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for MacOSTap {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for MacOSTap {
    /// Install the tap on a dedicated run-loop thread.
    ///
    /// Blocks until the thread reports whether the tap could be created, so a
    /// missing permission surfaces here rather than on the background thread.
    fn attach(&mut self, sink: EventSink) -> Result<(), CollectorError> {
        if self.thread_handle.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let (ready_tx, ready_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("keytally-event-tap".to_string())
            .spawn(move || {
                run_event_loop(sink, running.clone(), ready_tx);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| CollectorError::CaptureFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.thread_handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CollectorError::CaptureFailed(
                    "event tap thread exited during setup".to_string(),
                ))
            }
        }
    }

    fn detach(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            // The run loop wakes at least every 100ms to check the flag
            let _ = handle.join();
        }
    }
}

impl Drop for MacOSTap {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Run the Core Graphics event loop until `running` is cleared.
fn run_event_loop(
    sink: EventSink,
    running: Arc<AtomicBool>,
    ready: Sender<Result<(), CollectorError>>,
) {
    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown],
        move |_proxy, event_type, event| {
            if matches!(event_type, CGEventType::KeyDown) {
                let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
                if let Ok(key_id) = u16::try_from(code) {
                    // Never blocks; a full queue drops the event
                    sink.deliver(KeyEvent::now(key_id));
                }
            }
            // We're passive observers
            CallbackResult::Keep
        },
    );

    let tap = match tap {
        Ok(tap) => tap,
        Err(_) => {
            error!("failed to create CGEvent tap; Input Monitoring permission is likely missing");
            let _ = ready.send(Err(CollectorError::PermissionDenied));
            return;
        }
    };

    let source = match tap.mach_port().create_runloop_source(0) {
        Ok(source) => source,
        Err(_) => {
            let _ = ready.send(Err(CollectorError::CaptureFailed(
                "failed to create run loop source".to_string(),
            )));
            return;
        }
    };

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }
    tap.enable();
    let _ = ready.send(Ok(()));
    debug!("CGEvent tap enabled");

    while running.load(Ordering::SeqCst) {
        CFRunLoop::run_in_mode(
            unsafe { kCFRunLoopDefaultMode },
            Duration::from_millis(100),
            false,
        );
    }

    // The tap is disabled when dropped, which also drops the sink
}

/// Check if the application has Input Monitoring permission.
///
/// macOS offers no direct query, so this probes by creating a passive tap,
/// which fails when permission has not been granted.
pub fn check_permission() -> bool {
    CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown],
        |_proxy, _type, _event| CallbackResult::Keep,
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_creation() {
        let tap = MacOSTap::new();
        assert!(!tap.is_running());
    }
}
