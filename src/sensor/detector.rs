//! Debounced motion detection
//!
//! [`MotionDetector::on_edge`] runs in interrupt context. It touches only
//! atomics: no locks, no allocation, no I/O. The control loop drains the
//! pending cell with [`MotionDetector::take_pending`].
//!
//! An edge is accepted iff no edge was accepted before, or at least
//! `window_ms` elapsed since the last accepted one. Several accepted edges
//! between two drains coalesce into a single pending event.

use super::MotionEvent;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Sentinel for "no timestamp" in the atomic cells
const NONE: u64 = u64::MAX;

#[derive(Debug)]
pub struct MotionDetector {
    window_ms: u64,
    last_trigger_ms: AtomicU64,
    pending_at_ms: AtomicU64,
    rejected: AtomicU32,
}

impl MotionDetector {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_trigger_ms: AtomicU64::new(NONE),
            pending_at_ms: AtomicU64::new(NONE),
            rejected: AtomicU32::new(0),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Record a rising edge seen at `now_ms`. Returns whether it was accepted.
    pub fn on_edge(&self, now_ms: u64) -> bool {
        let last = self.last_trigger_ms.load(Ordering::Acquire);
        let outside_window = last == NONE || now_ms.saturating_sub(last) >= self.window_ms;

        // A lost exchange means another edge was accepted concurrently, which
        // puts this one inside the window.
        if !outside_window
            || self
                .last_trigger_ms
                .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.pending_at_ms.store(now_ms, Ordering::Release);
        true
    }

    /// Take the pending detection, if any. Each accepted edge is returned at most once.
    pub fn take_pending(&self) -> Option<MotionEvent> {
        match self.pending_at_ms.swap(NONE, Ordering::AcqRel) {
            NONE => None,
            at => Some(MotionEvent::detected(at)),
        }
    }

    /// Timestamp of the last accepted edge
    pub fn last_trigger_ms(&self) -> Option<u64> {
        match self.last_trigger_ms.load(Ordering::Acquire) {
            NONE => None,
            at => Some(at),
        }
    }

    /// Whether `now_ms` still falls inside the debounce window of the last accepted edge
    pub fn window_active(&self, now_ms: u64) -> bool {
        self.last_trigger_ms()
            .is_some_and(|last| now_ms.saturating_sub(last) < self.window_ms)
    }

    /// Number of edges discarded by the debounce policy since boot
    pub fn rejected_edges(&self) -> u32 {
        self.rejected.load(Ordering::Relaxed)
    }
}
