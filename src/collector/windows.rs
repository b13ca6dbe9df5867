//! Windows event source using a low-level keyboard hook.
//!
//! Installs `WH_KEYBOARD_LL` on a dedicated message-loop thread. The hook
//! always calls the next hook, so keystrokes reach other applications
//! unmodified. Windows virtual-key codes are translated into the macOS key-code
//! space used by the aggregate; keys with no counterpart are ignored.

use crate::collector::source::{CollectorError, EventSink, EventSource};
use crate::collector::types::{KeyEvent, KeyId};
use crossbeam_channel::{bounded, Sender};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, GetMessageW, PostThreadMessageW, SetWindowsHookExW, UnhookWindowsHookEx,
    HHOOK, KBDLLHOOKSTRUCT, MSG, WH_KEYBOARD_LL, WM_KEYDOWN, WM_QUIT, WM_SYSKEYDOWN,
};

static VK_TO_KEY_ID: phf::Map<u32, u16> = phf::phf_map! {
    0x41u32 => 0u16,   // A
    0x53u32 => 1u16,   // S
    0x44u32 => 2u16,   // D
    0x46u32 => 3u16,   // F
    0x48u32 => 4u16,   // H
    0x47u32 => 5u16,   // G
    0x5Au32 => 6u16,   // Z
    0x58u32 => 7u16,   // X
    0x43u32 => 8u16,   // C
    0x56u32 => 9u16,   // V
    0x42u32 => 11u16,  // B
    0x51u32 => 12u16,  // Q
    0x57u32 => 13u16,  // W
    0x45u32 => 14u16,  // E
    0x52u32 => 15u16,  // R
    0x59u32 => 16u16,  // Y
    0x54u32 => 17u16,  // T
    0x31u32 => 18u16,  // 1
    0x32u32 => 19u16,  // 2
    0x33u32 => 20u16,  // 3
    0x34u32 => 21u16,  // 4
    0x36u32 => 22u16,  // 6
    0x35u32 => 23u16,  // 5
    0xBBu32 => 24u16,  // =
    0x39u32 => 25u16,  // 9
    0x37u32 => 26u16,  // 7
    0xBDu32 => 27u16,  // -
    0x38u32 => 28u16,  // 8
    0x30u32 => 29u16,  // 0
    0xDDu32 => 30u16,  // ]
    0x4Fu32 => 31u16,  // O
    0x55u32 => 32u16,  // U
    0xDBu32 => 33u16,  // [
    0x49u32 => 34u16,  // I
    0x50u32 => 35u16,  // P
    0x0Du32 => 36u16,  // Return
    0x4Cu32 => 37u16,  // L
    0x4Au32 => 38u16,  // J
    0xDEu32 => 39u16,  // '
    0x4Bu32 => 40u16,  // K
    0xBAu32 => 41u16,  // ;
    0xDCu32 => 42u16,  // backslash
    0xBCu32 => 43u16,  // ,
    0xBFu32 => 44u16,  // /
    0x4Eu32 => 45u16,  // N
    0x4Du32 => 46u16,  // M
    0xBEu32 => 47u16,  // .
    0x09u32 => 48u16,  // Tab
    0x20u32 => 49u16,  // Space
    0xC0u32 => 50u16,  // `
    0x08u32 => 51u16,  // Backspace
    0x1Bu32 => 53u16,  // Escape
    0x5Cu32 => 54u16,  // Right Windows
    0x5Bu32 => 55u16,  // Left Windows
    0xA0u32 => 56u16,  // Left Shift
    0x14u32 => 57u16,  // Caps Lock
    0xA4u32 => 58u16,  // Left Alt
    0xA2u32 => 59u16,  // Left Control
    0xA1u32 => 60u16,  // Right Shift
    0xA5u32 => 61u16,  // Right Alt
    0xA3u32 => 62u16,  // Right Control
    0x6Eu32 => 65u16,  // Numpad .
    0x6Au32 => 67u16,  // Numpad *
    0x6Bu32 => 69u16,  // Numpad +
    0x0Cu32 => 71u16,  // Clear
    0xAFu32 => 72u16,  // Volume Up
    0xAEu32 => 73u16,  // Volume Down
    0xADu32 => 74u16,  // Mute
    0x6Fu32 => 75u16,  // Numpad /
    0x6Du32 => 78u16,  // Numpad -
    0x60u32 => 82u16,  // Numpad 0
    0x61u32 => 83u16,
    0x62u32 => 84u16,
    0x63u32 => 85u16,
    0x64u32 => 86u16,
    0x65u32 => 87u16,
    0x66u32 => 88u16,
    0x67u32 => 89u16,
    0x68u32 => 91u16,
    0x69u32 => 92u16,  // Numpad 9
    0x70u32 => 122u16, // F1
    0x71u32 => 120u16,
    0x72u32 => 99u16,
    0x73u32 => 118u16,
    0x74u32 => 96u16,
    0x75u32 => 97u16,
    0x76u32 => 98u16,
    0x77u32 => 100u16,
    0x78u32 => 101u16,
    0x79u32 => 109u16,
    0x7Au32 => 103u16,
    0x7Bu32 => 111u16, // F12
    0x7Cu32 => 105u16, // F13
    0x7Du32 => 107u16,
    0x7Eu32 => 113u16,
    0x7Fu32 => 106u16,
    0x80u32 => 64u16,
    0x81u32 => 79u16,
    0x82u32 => 80u16,
    0x83u32 => 90u16,  // F20
    0x2Du32 => 114u16, // Insert
    0x24u32 => 115u16, // Home
    0x21u32 => 116u16, // Page Up
    0x2Eu32 => 117u16, // Delete
    0x23u32 => 119u16, // End
    0x22u32 => 121u16, // Page Down
    0x25u32 => 123u16, // Left
    0x27u32 => 124u16, // Right
    0x28u32 => 125u16, // Down
    0x26u32 => 126u16, // Up
};

/// Translate a Windows virtual-key code into a key identifier.
pub fn key_id_for_vk(vk: u32) -> Option<KeyId> {
    VK_TO_KEY_ID.get(&vk).copied()
}

thread_local! {
    // Hook procedures cannot capture; the hook runs on the installing thread.
    static EVENT_SINK: RefCell<Option<EventSink>> = const { RefCell::new(None) };
}

/// The Windows event source using a low-level keyboard hook.
pub struct WindowsHook {
    hook_thread_id: Arc<AtomicU32>,
    thread_handle: Option<JoinHandle<()>>,
}

impl WindowsHook {
    /// Create a detached hook.
    pub fn new() -> Self {
        Self {
            hook_thread_id: Arc::new(AtomicU32::new(0)),
            thread_handle: None,
        }
    }

    /// Check if the hook thread is currently running.
    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }
}

impl Default for WindowsHook {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for WindowsHook {
    fn attach(&mut self, sink: EventSink) -> Result<(), CollectorError> {
        if self.thread_handle.is_some() {
            return Ok(());
        }

        let thread_id = self.hook_thread_id.clone();
        let (ready_tx, ready_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("keytally-keyboard-hook".to_string())
            .spawn(move || run_hook_loop(sink, thread_id, ready_tx))
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
                    "keyboard hook thread exited during setup".to_string(),
                ))
            }
        }
    }

    fn detach(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let thread_id = self.hook_thread_id.load(Ordering::SeqCst);
            // GetMessageW blocks, so wake the loop with WM_QUIT
            unsafe {
                let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
            }
            let _ = handle.join();
        }
    }
}

impl Drop for WindowsHook {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Low-level keyboard hook callback.
unsafe extern "system" fn keyboard_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code >= 0 && matches!(w_param.0 as u32, WM_KEYDOWN | WM_SYSKEYDOWN) {
        let kb_struct = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
        if let Some(key_id) = key_id_for_vk(kb_struct.vkCode) {
            EVENT_SINK.with(|sink| {
                if let Some(ref s) = *sink.borrow() {
                    s.deliver(KeyEvent::now(key_id));
                }
            });
        }
    }

    // Pass the event to the next hook
    CallNextHookEx(HHOOK::default(), n_code, w_param, l_param)
}

/// Install the hook and pump messages until WM_QUIT.
fn run_hook_loop(
    sink: EventSink,
    thread_id: Arc<AtomicU32>,
    ready: Sender<Result<(), CollectorError>>,
) {
    EVENT_SINK.with(|s| *s.borrow_mut() = Some(sink));

    unsafe {
        thread_id.store(GetCurrentThreadId(), Ordering::SeqCst);

        let hook = match SetWindowsHookExW(
            WH_KEYBOARD_LL,
            Some(keyboard_hook_proc),
            HINSTANCE::default(),
            0,
        ) {
            Ok(hook) => hook,
            Err(e) => {
                error!("failed to install keyboard hook: {e}");
                EVENT_SINK.with(|s| *s.borrow_mut() = None);
                let _ = ready.send(Err(CollectorError::PermissionDenied));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        debug!("keyboard hook installed");

        let mut msg = MSG::default();
        // Returns 0 on WM_QUIT and -1 on error
        while GetMessageW(&mut msg, HWND::default(), 0, 0).0 > 0 {}

        let _ = UnhookWindowsHookEx(hook);
    }

    EVENT_SINK.with(|s| *s.borrow_mut() = None);
}

/// Check if the application can install a low-level keyboard hook.
///
/// Low-level hooks generally work without explicit permission, but may be
/// blocked by policy; this installs and removes a temporary hook to verify.
pub fn check_permission() -> bool {
    unsafe {
        match SetWindowsHookExW(
            WH_KEYBOARD_LL,
            Some(keyboard_hook_proc),
            HINSTANCE::default(),
            0,
        ) {
            Ok(hook) => {
                let _ = UnhookWindowsHookEx(hook);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_translation() {
        assert_eq!(key_id_for_vk(0x20), Some(49));
        assert_eq!(key_id_for_vk(0x08), Some(51));
        assert_eq!(key_id_for_vk(0x41), Some(0));
        assert_eq!(key_id_for_vk(0xFF), None);
    }

    #[test]
    fn test_hook_creation() {
        let hook = WindowsHook::new();
        assert!(!hook.is_running());
    }
}
