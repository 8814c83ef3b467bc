//! Host platform seam: frame and timer callback chains.
//!
//! The host owns the real callback machinery (display refresh, timers). The
//! core only asks it to arm or cancel a chain and later receives the fired
//! handle back through `GameClient::on_animation_frame` /
//! `GameClient::on_interval`.

use std::time::Duration;

/// Opaque id of an armed platform callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

impl CallbackHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Platform callback scheduling.
///
/// Cancelling a handle that already fired (or was already cancelled) MUST be
/// a no-op.
pub trait Platform {
    /// Arm a one-shot callback for the next display refresh.
    fn request_frame(&mut self) -> CallbackHandle;

    fn cancel_frame(&mut self, handle: CallbackHandle);

    /// Arm a repeating callback with the given period.
    fn start_interval(&mut self, period: Duration) -> CallbackHandle;

    fn cancel_interval(&mut self, handle: CallbackHandle);
}

/// Page visibility and window focus, tracked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    pub visible: bool,
    pub focused: bool,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::foreground()
    }
}

impl Visibility {
    pub const fn foreground() -> Self {
        Self {
            visible: true,
            focused: true,
        }
    }

    pub const fn hidden() -> Self {
        Self {
            visible: false,
            focused: false,
        }
    }

    /// Frame callbacks are only trusted when the page is both visible and focused.
    pub fn is_foreground(self) -> bool {
        self.visible && self.focused
    }
}

// ============================================================================
// Headless Platform
// ============================================================================

/// In-process platform with manually fired callbacks.
///
/// Used by headless hosts and tests: it hands out handles, remembers which
/// are armed, and lets the caller fire them in any order.
#[derive(Debug, Default)]
pub struct HeadlessPlatform {
    next_handle: u64,
    frames: Vec<CallbackHandle>,
    intervals: Vec<(CallbackHandle, Duration)>,
    frames_requested: u64,
    intervals_started: u64,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> CallbackHandle {
        self.next_handle += 1;
        CallbackHandle::new(self.next_handle)
    }

    /// Number of armed callback chains (frames plus intervals).
    pub fn armed_chains(&self) -> usize {
        self.frames.len() + self.intervals.len()
    }

    /// The armed frame callback, if any.
    pub fn pending_frame(&self) -> Option<CallbackHandle> {
        self.frames.first().copied()
    }

    /// Disarm and return the oldest pending frame, as a display refresh would.
    pub fn fire_frame(&mut self) -> Option<CallbackHandle> {
        if self.frames.is_empty() {
            None
        } else {
            Some(self.frames.remove(0))
        }
    }

    /// The armed interval and its period, if any. Intervals stay armed when fired.
    pub fn interval(&self) -> Option<(CallbackHandle, Duration)> {
        self.intervals.first().copied()
    }

    pub fn frames_requested(&self) -> u64 {
        self.frames_requested
    }

    pub fn intervals_started(&self) -> u64 {
        self.intervals_started
    }
}

impl Platform for HeadlessPlatform {
    fn request_frame(&mut self) -> CallbackHandle {
        let handle = self.next();
        self.frames.push(handle);
        self.frames_requested += 1;
        handle
    }

    fn cancel_frame(&mut self, handle: CallbackHandle) {
        self.frames.retain(|&h| h != handle);
    }

    fn start_interval(&mut self, period: Duration) -> CallbackHandle {
        let handle = self.next();
        self.intervals.push((handle, period));
        self.intervals_started += 1;
        handle
    }

    fn cancel_interval(&mut self, handle: CallbackHandle) {
        self.intervals.retain(|&(h, _)| h != handle);
    }
}
