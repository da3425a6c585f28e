//! Single-shot "activity stopped" detection
//!
//! The monitor is armed by an accepted detection and fires at most once per
//! motion episode. It starts disarmed so a freshly booted node stays quiet
//! until it has seen motion.

use super::MotionEvent;

#[derive(Debug, Clone)]
pub struct InactivityMonitor {
    idle_threshold_ms: u64,
    last_motion_ms: u64,
    stopped_already: bool,
}

impl InactivityMonitor {
    pub fn new(idle_threshold_ms: u64) -> Self {
        Self {
            idle_threshold_ms,
            last_motion_ms: 0,
            stopped_already: true,
        }
    }

    /// Re-arm on an accepted detection
    pub fn on_motion(&mut self, now_ms: u64) {
        self.last_motion_ms = now_ms;
        self.stopped_already = false;
    }

    /// Emit `ActivityStopped` once the idle threshold has elapsed since the last motion
    pub fn tick(&mut self, now_ms: u64) -> Option<MotionEvent> {
        if self.stopped_already
            || now_ms.saturating_sub(self.last_motion_ms) < self.idle_threshold_ms
        {
            return None;
        }

        self.stopped_already = true;
        Some(MotionEvent::stopped(now_ms))
    }

    pub fn is_armed(&self) -> bool {
        !self.stopped_already
    }

    pub fn last_motion_ms(&self) -> u64 {
        self.last_motion_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::MotionKind;
    use proptest::prelude::*;

    const THRESHOLD: u64 = 300_000;

    #[test]
    fn test_no_stop_before_first_motion() {
        let mut monitor = InactivityMonitor::new(THRESHOLD);
        assert_eq!(monitor.tick(10 * THRESHOLD), None);
        assert!(!monitor.is_armed());
    }

    #[test]
    fn test_stop_emitted_once_at_threshold() {
        let mut monitor = InactivityMonitor::new(THRESHOLD);
        monitor.on_motion(0);

        assert_eq!(monitor.tick(299_999), None);
        let event = monitor.tick(300_000).expect("stop at threshold");
        assert_eq!(event.kind, MotionKind::ActivityStopped);
        assert_eq!(event.timestamp_ms, 300_000);

        assert_eq!(monitor.tick(300_001), None);
        assert_eq!(monitor.tick(900_000), None);
    }

    #[test]
    fn test_new_motion_rearms() {
        let mut monitor = InactivityMonitor::new(THRESHOLD);
        monitor.on_motion(0);
        assert!(monitor.tick(300_000).is_some());

        monitor.on_motion(400_000);
        assert!(monitor.is_armed());
        assert_eq!(monitor.tick(600_000), None);
        assert_eq!(monitor.tick(700_000), Some(MotionEvent::stopped(700_000)));
    }

    #[test]
    fn test_motion_before_threshold_postpones_stop() {
        let mut monitor = InactivityMonitor::new(THRESHOLD);
        monitor.on_motion(0);
        monitor.on_motion(200_000);

        assert_eq!(monitor.tick(300_000), None);
        assert!(monitor.tick(500_000).is_some());
    }

    proptest! {
        #[test]
        fn exactly_one_stop_per_episode(
            start in 0u64..1_000_000,
            ticks in proptest::collection::vec(0u64..2_000_000, 1..100),
        ) {
            let mut monitor = InactivityMonitor::new(THRESHOLD);
            monitor.on_motion(start);

            let mut sorted = ticks;
            sorted.sort_unstable();
            let fired = sorted
                .iter()
                .filter_map(|offset| monitor.tick(start + offset))
                .count();

            let expected = usize::from(sorted.last().is_some_and(|last| *last >= THRESHOLD));
            prop_assert_eq!(fired, expected);
        }
    }
}
