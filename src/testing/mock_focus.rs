use crate::usb::{FocusSurface, FocusTarget};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// In-memory focus model for the USB listener.
#[derive(Debug)]
pub struct MockFocusSurface {
    target: Mutex<FocusTarget>,
    window_focused: AtomicBool,
    claims: AtomicU32,
}

impl MockFocusSurface {
    pub fn new(target: FocusTarget) -> Self {
        Self {
            target: Mutex::new(target),
            window_focused: AtomicBool::new(true),
            claims: AtomicU32::new(0),
        }
    }

    /// Simulate the user clicking into another element.
    pub fn set_target(&self, target: FocusTarget) {
        *self.target.lock().unwrap_or_else(|e| e.into_inner()) = target;
    }

    pub fn set_window_focused(&self, focused: bool) {
        self.window_focused.store(focused, Ordering::SeqCst);
    }

    /// Times the capture surface took focus.
    pub fn claims(&self) -> u32 {
        self.claims.load(Ordering::SeqCst)
    }
}

impl FocusSurface for MockFocusSurface {
    fn active_target(&self) -> FocusTarget {
        *self.target.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn window_focused(&self) -> bool {
        self.window_focused.load(Ordering::SeqCst)
    }

    fn focus_capture(&self) {
        self.claims.fetch_add(1, Ordering::SeqCst);
        self.set_target(FocusTarget::Capture);
    }
}
