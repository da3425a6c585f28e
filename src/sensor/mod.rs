//! Motion sensing: edge capture, debounce and inactivity tracking
//!
//! - [`latch`] - rising-edge capture from a digital input or an interrupt
//! - [`detector`] - debounce policy and the interrupt-to-loop handoff cell
//! - [`inactivity`] - single-shot "activity stopped" detection
//! - [`indicator`] - optional status output driven by the debounce window

pub mod detector;
pub mod inactivity;
pub mod indicator;
pub mod latch;

pub use detector::MotionDetector;
pub use inactivity::InactivityMonitor;
pub use indicator::{NoIndicator, StatusIndicator};
pub use latch::{DigitalInput, DigitalInputLatch, InputError, InterruptHandle, SysfsInput};

/// What a [`MotionEvent`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    /// A debounced motion edge was accepted
    Detected,
    /// No motion for longer than the inactivity threshold
    ActivityStopped,
}

/// A motion occurrence, consumed exactly once by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionEvent {
    /// Monotonic milliseconds at which the event happened
    pub timestamp_ms: u64,
    pub kind: MotionKind,
}

impl MotionEvent {
    pub fn detected(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            kind: MotionKind::Detected,
        }
    }

    pub fn stopped(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            kind: MotionKind::ActivityStopped,
        }
    }
}
