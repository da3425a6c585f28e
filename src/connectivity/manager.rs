//! Network link state machine
//!
//! ```text
//! Disconnected --begin--> Connecting --up--> Connected
//!      ^                      |                  |
//!      +---timeout/failure----+                  |
//!      +-------------------link lost-------------+
//! ```
//!
//! Each [`ConnectivityManager::tick`] does at most one bounded step. An
//! attempt polls the link every `attempt_interval_ms` and fails after
//! `max_attempts` polls or `connect_timeout_ms`, whichever comes first. A
//! failed attempt is retried after `retry_delay_ms`, forever.

use super::link::{LinkCredentials, LinkStatus, NetworkLink};
use crate::config::NetworkSection;
use crate::link_span;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Network availability as seen by the rest of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected {
        next_attempt_at: u64,
    },
    Connecting {
        started_at: u64,
        next_poll_at: u64,
        polls: u32,
    },
    Connected,
}

impl Phase {
    fn state(&self) -> ConnectivityState {
        match self {
            Phase::Disconnected { .. } => ConnectivityState::Disconnected,
            Phase::Connecting { .. } => ConnectivityState::Connecting,
            Phase::Connected => ConnectivityState::Connected,
        }
    }
}

pub struct ConnectivityManager<L: NetworkLink> {
    link: L,
    credentials: LinkCredentials,
    config: NetworkSection,
    phase: Phase,
    consecutive_failures: u32,
    state_tx: watch::Sender<ConnectivityState>,
}

impl<L: NetworkLink> ConnectivityManager<L> {
    pub fn new(link: L, credentials: LinkCredentials, config: NetworkSection) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::Disconnected);
        Self {
            link,
            credentials,
            config,
            phase: Phase::Disconnected { next_attempt_at: 0 },
            consecutive_failures: 0,
            state_tx,
        }
    }

    pub fn current_state(&self) -> ConnectivityState {
        self.phase.state()
    }

    /// Receiver that observes every state transition
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    /// Failed attempts since the link was last up
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Advance the state machine by one bounded step
    pub fn tick(&mut self, now_ms: u64) {
        match self.phase {
            Phase::Disconnected { next_attempt_at } => {
                if now_ms >= next_attempt_at {
                    self.begin_attempt(now_ms);
                }
            }
            Phase::Connecting { .. } => self.poll_attempt(now_ms),
            Phase::Connected => {
                if self.link.status() != LinkStatus::Up {
                    warn!("Network link lost, tearing down for a fresh connect");
                    self.link.disconnect();
                    self.transition(Phase::Disconnected {
                        next_attempt_at: now_ms,
                    });
                }
            }
        }
    }

    fn begin_attempt(&mut self, now_ms: u64) {
        let _span = link_span!(ssid = %self.credentials.ssid).entered();

        // Never resume a half-open association
        self.link.disconnect();

        match self.link.begin(&self.credentials) {
            Ok(()) => {
                info!(
                    "Connecting to network (attempt cycle {})",
                    self.consecutive_failures + 1
                );
                self.transition(Phase::Connecting {
                    started_at: now_ms,
                    next_poll_at: now_ms,
                    polls: 0,
                });
                self.poll_attempt(now_ms);
            }
            Err(e) => self.fail_attempt(now_ms, &e.to_string()),
        }
    }

    fn poll_attempt(&mut self, now_ms: u64) {
        let Phase::Connecting {
            started_at,
            next_poll_at,
            polls,
        } = self.phase
        else {
            return;
        };

        let elapsed = now_ms.saturating_sub(started_at);
        if elapsed >= self.config.connect_timeout_ms {
            self.fail_attempt(now_ms, &format!("timed out after {elapsed}ms"));
            return;
        }
        if now_ms < next_poll_at {
            return;
        }

        match self.link.status() {
            LinkStatus::Up => {
                self.consecutive_failures = 0;
                self.transition(Phase::Connected);
            }
            LinkStatus::Failed => self.fail_attempt(now_ms, "link driver reported failure"),
            LinkStatus::Idle | LinkStatus::Associating => {
                let polls = polls + 1;
                if polls >= self.config.max_attempts {
                    self.fail_attempt(now_ms, &format!("not up after {polls} attempts"));
                } else {
                    debug!(polls, "Network not up yet");
                    self.phase = Phase::Connecting {
                        started_at,
                        next_poll_at: now_ms.saturating_add(self.config.attempt_interval_ms),
                        polls,
                    };
                }
            }
        }
    }

    fn fail_attempt(&mut self, now_ms: u64, reason: &str) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        warn!(
            failures = self.consecutive_failures,
            "Network connection failed: {}, retrying in {}ms", reason, self.config.retry_delay_ms
        );
        self.link.disconnect();
        self.transition(Phase::Disconnected {
            next_attempt_at: now_ms.saturating_add(self.config.retry_delay_ms),
        });
    }

    fn transition(&mut self, next: Phase) {
        let from = self.phase.state();
        self.phase = next;
        let to = next.state();
        if from != to {
            log_state_transition(from, to);
            self.state_tx.send_replace(to);
        }
    }
}

fn log_state_transition(from: ConnectivityState, to: ConnectivityState) {
    match (from, to) {
        (ConnectivityState::Connecting, ConnectivityState::Connected) => {
            info!("Network connected");
        }
        (ConnectivityState::Connected, ConnectivityState::Disconnected) => {
            warn!("Network disconnected");
        }
        _ => debug!("Network state: {:?} -> {:?}", from, to),
    }
}
