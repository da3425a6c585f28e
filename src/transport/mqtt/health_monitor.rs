//! Keepalive and retry decisions for broker sessions
//!
//! Pure functions over timestamps; the messaging client owns the state.

use super::connection::{ReconnectPolicy, SessionPhase};
use tracing::{debug, info, warn};

/// Missed keepalive periods after which a silent session is declared dead
pub const KEEPALIVE_GRACE_FACTOR: u64 = 2;

/// When and how the next session attempt happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Consecutive failures including this one
    pub attempt: u32,
    pub delay_ms: u64,
    pub next_retry_at_ms: u64,
}

pub struct HealthMonitor;

impl HealthMonitor {
    /// True once the broker has been silent for `KEEPALIVE_GRACE_FACTOR` keepalive periods
    pub fn is_session_stale(last_activity_ms: u64, now_ms: u64, keepalive_secs: u64) -> bool {
        let limit = keepalive_secs
            .saturating_mul(1_000)
            .saturating_mul(KEEPALIVE_GRACE_FACTOR);
        now_ms.saturating_sub(last_activity_ms) >= limit
    }

    pub fn handshake_timed_out(started_at_ms: u64, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(started_at_ms) >= timeout_ms
    }

    /// Schedule the next attempt after a failure
    pub fn schedule_retry(
        current_failures: u32,
        policy: &ReconnectPolicy,
        now_ms: u64,
    ) -> RetrySchedule {
        let attempt = current_failures.saturating_add(1);
        let delay_ms = policy.delay_for_attempt(attempt);
        RetrySchedule {
            attempt,
            delay_ms,
            next_retry_at_ms: now_ms.saturating_add(delay_ms),
        }
    }

    /// Check whether a new session may be opened
    pub fn can_open(phase: SessionPhase, next_retry_at_ms: u64, now_ms: u64) -> bool {
        phase == SessionPhase::Idle && now_ms >= next_retry_at_ms
    }

    pub fn log_state_transition(from: SessionPhase, to: SessionPhase, reason: &str) {
        match (from, to) {
            (SessionPhase::Handshaking { .. }, SessionPhase::Online) => {
                info!("MQTT session established");
            }
            (SessionPhase::Online, SessionPhase::Idle) => {
                warn!("MQTT session lost: {}", reason);
            }
            (SessionPhase::Handshaking { .. }, SessionPhase::Idle) => {
                warn!("MQTT handshake failed: {}", reason);
            }
            _ => {
                debug!("MQTT session: {} -> {}", from.name(), to.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_session_stale_after_two_keepalives() {
        assert!(!HealthMonitor::is_session_stale(1_000, 120_999, 60));
        assert!(HealthMonitor::is_session_stale(1_000, 121_000, 60));
    }

    #[test]
    fn test_clock_behind_activity_is_not_stale() {
        assert!(!HealthMonitor::is_session_stale(5_000, 1_000, 60));
    }

    #[test]
    fn test_handshake_timeout() {
        assert!(!HealthMonitor::handshake_timed_out(0, 29_999, 30_000));
        assert!(HealthMonitor::handshake_timed_out(0, 30_000, 30_000));
    }

    #[test]
    fn test_schedule_retry_fixed() {
        let schedule = HealthMonitor::schedule_retry(0, &ReconnectPolicy::default(), 10_000);
        assert_eq!(
            schedule,
            RetrySchedule {
                attempt: 1,
                delay_ms: 5_000,
                next_retry_at_ms: 15_000
            }
        );
    }

    #[test]
    fn test_can_open() {
        assert!(HealthMonitor::can_open(SessionPhase::Idle, 100, 100));
        assert!(!HealthMonitor::can_open(SessionPhase::Idle, 100, 99));
        assert!(!HealthMonitor::can_open(SessionPhase::Online, 0, 100));
        assert!(!HealthMonitor::can_open(
            SessionPhase::Handshaking { started_at_ms: 0 },
            0,
            100
        ));
    }

    proptest! {
        #[test]
        fn retry_never_scheduled_in_the_past(
            failures in 0u32..1_000,
            base in 1u64..10_000,
            max in 10_000u64..600_000,
            now in 0u64..u64::MAX / 2,
        ) {
            let policy = ReconnectPolicy::Exponential { base_ms: base, max_ms: max };
            let schedule = HealthMonitor::schedule_retry(failures, &policy, now);
            prop_assert!(schedule.next_retry_at_ms >= now);
            prop_assert!(schedule.delay_ms <= max);
            prop_assert_eq!(schedule.attempt, failures + 1);
        }
    }
}
