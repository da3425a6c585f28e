//! Mock collaborators for testing
//!
//! Every mock is `Clone` and shares its state between clones: hand one clone
//! to the component under test and keep the other to script behavior and
//! inspect calls.

use crate::connectivity::{LinkCredentials, LinkError, LinkStatus, NetworkLink};
use crate::node::Watchdog;
use crate::sensor::{DigitalInput, InputError, StatusIndicator};
use crate::transport::{BrokerTransport, MqttError, QoS, SessionEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct MockLinkState {
    begun: bool,
    polls: u32,
    up_after: Option<u32>,
    fail: bool,
    reject: bool,
    dropped: bool,
    begin_calls: u32,
    status_calls: u32,
    disconnect_calls: u32,
}

/// Scriptable network link
///
/// Reports `Associating` until `up_after_polls` status checks have passed.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockLinkState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Come up after `polls` status checks of an association
    pub fn up_after_polls(&self, polls: u32) {
        let mut state = lock(&self.state);
        state.up_after = Some(polls);
        state.fail = false;
    }

    /// Report `Failed` for every association
    pub fn fail_association(&self) {
        lock(&self.state).fail = true;
    }

    pub fn reject_begin(&self, reject: bool) {
        lock(&self.state).reject = reject;
    }

    /// Lose an established link
    pub fn drop_link(&self) {
        lock(&self.state).dropped = true;
    }

    pub fn begin_calls(&self) -> u32 {
        lock(&self.state).begin_calls
    }

    pub fn status_calls(&self) -> u32 {
        lock(&self.state).status_calls
    }

    pub fn disconnect_calls(&self) -> u32 {
        lock(&self.state).disconnect_calls
    }
}

impl NetworkLink for MockLink {
    fn begin(&mut self, _credentials: &LinkCredentials) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        state.begin_calls += 1;
        if state.reject {
            return Err(LinkError::Rejected("mock rejection".to_string()));
        }
        state.begun = true;
        state.polls = 0;
        state.dropped = false;
        Ok(())
    }

    fn status(&self) -> LinkStatus {
        let mut state = lock(&self.state);
        state.status_calls += 1;
        if !state.begun {
            return LinkStatus::Idle;
        }
        if state.fail {
            return LinkStatus::Failed;
        }
        if state.dropped {
            return LinkStatus::Idle;
        }
        match state.up_after {
            Some(n) if state.polls >= n => LinkStatus::Up,
            _ => {
                state.polls += 1;
                LinkStatus::Associating
            }
        }
    }

    fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        state.disconnect_calls += 1;
        state.begun = false;
    }
}

/// A call made on [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Open,
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Subscribe {
        topic: String,
    },
    Close,
}

#[derive(Debug, Default)]
struct MockTransportState {
    open: bool,
    events: VecDeque<SessionEvent>,
    calls: Vec<TransportCall>,
    fail_open: bool,
    fail_publishes: bool,
    auto_connack: bool,
    failed_publishes: u32,
}

/// Scriptable broker transport
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

pub type PublishedMessage = (String, Vec<u8>, bool);

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a ConnAck as soon as a session is opened
    pub fn with_auto_connack() -> Self {
        let transport = Self::new();
        lock(&transport.state).auto_connack = true;
        transport
    }

    /// Queue an event for the open session
    pub fn push_event(&self, event: SessionEvent) {
        lock(&self.state).events.push_back(event);
    }

    pub fn fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn fail_publishes(&self, fail: bool) {
        lock(&self.state).fail_publishes = fail;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.state).calls.clone()
    }

    /// Successful publishes as `(topic, payload, retain)`
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Publish {
                    topic,
                    payload,
                    retain,
                } => Some((topic.clone(), payload.clone(), *retain)),
                _ => None,
            })
            .collect()
    }

    /// Successful publishes to one topic, payloads only
    pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published()
            .into_iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, payload, _)| payload)
            .collect()
    }

    pub fn failed_publishes(&self) -> u32 {
        lock(&self.state).failed_publishes
    }

    pub fn open_calls(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Open))
    }

    pub fn close_calls(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Close))
    }

    fn count(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        lock(&self.state).calls.iter().filter(|c| predicate(c)).count()
    }
}

impl BrokerTransport for MockTransport {
    fn open(&mut self) -> Result<(), MqttError> {
        let mut state = lock(&self.state);
        state.calls.push(TransportCall::Open);
        if state.fail_open {
            return Err(MqttError::ConnectionFailed("mock open failure".to_string()));
        }
        state.open = true;
        if state.auto_connack {
            state.events.push_back(SessionEvent::Connected);
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        let mut state = lock(&self.state);
        if !state.open {
            return None;
        }
        state.events.pop_front()
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        _qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(MqttError::SessionClosed);
        }
        if state.fail_publishes {
            state.failed_publishes += 1;
            return Err(MqttError::PublishFailed("mock publish failure".into()));
        }
        state.calls.push(TransportCall::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
        });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), MqttError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(MqttError::SessionClosed);
        }
        state.calls.push(TransportCall::Subscribe {
            topic: topic.to_string(),
        });
        Ok(())
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.calls.push(TransportCall::Close);
        state.open = false;
        state.events.clear();
    }
}

#[derive(Debug, Default)]
struct ScriptedLevels {
    pending: VecDeque<bool>,
    last: bool,
}

/// Digital input that replays a script of levels, then holds the last one
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    levels: Arc<Mutex<ScriptedLevels>>,
}

impl ScriptedInput {
    pub fn new(levels: Vec<bool>) -> Self {
        Self {
            levels: Arc::new(Mutex::new(ScriptedLevels {
                pending: levels.into(),
                last: false,
            })),
        }
    }

    /// Append a level to the script
    pub fn push(&self, level: bool) {
        lock(&self.levels).pending.push_back(level);
    }
}

impl DigitalInput for ScriptedInput {
    fn is_high(&mut self) -> Result<bool, InputError> {
        let mut levels = lock(&self.levels);
        if let Some(level) = levels.pending.pop_front() {
            levels.last = level;
        }
        Ok(levels.last)
    }
}

/// Indicator that records every `set` call
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    states: Arc<Mutex<Vec<bool>>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<bool> {
        lock(&self.states).clone()
    }

    pub fn is_on(&self) -> bool {
        lock(&self.states).last().copied().unwrap_or(false)
    }
}

impl StatusIndicator for RecordingIndicator {
    fn set(&mut self, on: bool) {
        lock(&self.states).push(on);
    }
}

/// Watchdog that counts feeds
#[derive(Debug, Clone, Default)]
pub struct CountingWatchdog {
    feeds: Arc<AtomicU64>,
}

impl CountingWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feeds(&self) -> u64 {
        self.feeds.load(Ordering::Relaxed)
    }
}

impl Watchdog for CountingWatchdog {
    fn feed(&mut self) {
        self.feeds.fetch_add(1, Ordering::Relaxed);
    }
}
