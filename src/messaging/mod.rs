//! Broker session management
//!
//! [`MessagingClient`] owns one [`MqttSession`] over a [`BrokerTransport`] and
//! advances it from the control loop:
//!
//! ```text
//! Idle --open--> Handshaking --ConnAck--> Online
//!  ^                  |                     |
//!  +--timeout/error---+                     |
//!  +-----disconnect/keepalive expired-------+
//! ```
//!
//! Sessions only exist while the network link is up. Losing the link drops
//! the session outright; a later link brings a brand new session.

use crate::config::MqttSection;
use crate::connectivity::ConnectivityState;
use crate::mqtt_span;
use crate::protocol::{STATUS_OFFLINE, STATUS_ONLINE, SensorIdentity};
use crate::transport::mqtt::{
    HealthMonitor, MessageForwarder, MessageHandler, MqttError, ReconnectPolicy, SessionPhase,
    qos_from_level,
};
use crate::transport::{BrokerTransport, InboundMessage, QoS, SessionEvent};
use std::collections::BTreeSet;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Upper bound on transport events handled per tick
const MAX_EVENTS_PER_TICK: usize = 64;

/// State of the current broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSession {
    pub broker_address: String,
    pub client_id: String,
    /// Topics confirmed subscribed in this session
    pub subscribed_topics: BTreeSet<String>,
    /// Consecutive failed sessions; zeroed on ConnAck
    pub retry_count: u32,
    pub next_retry_at_ms: u64,
    pub phase: SessionPhase,
    pub last_activity_ms: u64,
}

impl MqttSession {
    fn new(broker_address: String, client_id: String) -> Self {
        Self {
            broker_address,
            client_id,
            subscribed_topics: BTreeSet::new(),
            retry_count: 0,
            next_retry_at_ms: 0,
            phase: SessionPhase::Idle,
            last_activity_ms: 0,
        }
    }
}

pub struct MessagingClient<T: BrokerTransport> {
    identity: SensorIdentity,
    transport: T,
    link_rx: watch::Receiver<ConnectivityState>,
    session: MqttSession,
    policy: ReconnectPolicy,
    qos: QoS,
    keepalive_secs: u64,
    connect_timeout_ms: u64,
    topics: Vec<String>,
    forwarder: MessageForwarder,
}

impl<T: BrokerTransport> MessagingClient<T> {
    pub fn new(
        config: &MqttSection,
        client_id: String,
        identity: SensorIdentity,
        transport: T,
        link_rx: watch::Receiver<ConnectivityState>,
    ) -> Self {
        let topics = if config.subscribe_config {
            vec![identity.config_topic()]
        } else {
            Vec::new()
        };

        Self {
            session: MqttSession::new(config.broker_url.clone(), client_id),
            identity,
            transport,
            link_rx,
            policy: config.reconnect,
            qos: qos_from_level(config.qos),
            keepalive_secs: config.keepalive_secs,
            connect_timeout_ms: config.connect_timeout_ms,
            topics,
            forwarder: MessageForwarder::new(),
        }
    }

    /// Route inbound publishes on subscribed topics to `sender`
    pub fn set_inbound_sender(&mut self, sender: mpsc::Sender<InboundMessage>) {
        self.forwarder.set_sender(sender);
    }

    pub fn is_connected(&self) -> bool {
        self.link_state() == ConnectivityState::Connected
            && self.session.phase == SessionPhase::Online
    }

    pub fn retry_count(&self) -> u32 {
        self.session.retry_count
    }

    pub fn session(&self) -> &MqttSession {
        &self.session
    }

    pub fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn link_state(&self) -> ConnectivityState {
        *self.link_rx.borrow()
    }

    /// Advance the session by one bounded step
    pub fn tick(&mut self, now_ms: u64) {
        if self.link_state() != ConnectivityState::Connected {
            if self.session.phase != SessionPhase::Idle {
                info!("Network down, dropping MQTT session");
                self.teardown();
            }
            return;
        }

        self.drain_events(now_ms);

        match self.session.phase {
            SessionPhase::Idle => {
                if HealthMonitor::can_open(self.session.phase, self.session.next_retry_at_ms, now_ms)
                {
                    self.begin_handshake(now_ms);
                }
            }
            SessionPhase::Handshaking { started_at_ms } => {
                if HealthMonitor::handshake_timed_out(started_at_ms, now_ms, self.connect_timeout_ms)
                {
                    self.fail_session(
                        now_ms,
                        &format!("no ConnAck within {}ms", self.connect_timeout_ms),
                    );
                }
            }
            SessionPhase::Online => {
                if HealthMonitor::is_session_stale(
                    self.session.last_activity_ms,
                    now_ms,
                    self.keepalive_secs,
                ) {
                    self.fail_session(now_ms, "keepalive expired");
                }
            }
        }
    }

    /// Enqueue a publish on the current session
    ///
    /// Fails with [`MqttError::NotConnected`] without touching the transport
    /// unless both the link and the session are up. Failures are not retried.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                link: self.link_state(),
                session_online: self.session.phase == SessionPhase::Online,
            });
        }
        self.transport.publish(topic, payload, self.qos, false)
    }

    /// Announce `offline` and close the session
    pub fn shutdown(&mut self) {
        if self.is_connected() {
            let status_topic = self.identity.status_topic();
            if let Err(e) =
                self.transport
                    .publish(&status_topic, STATUS_OFFLINE.as_bytes(), self.qos, true)
            {
                warn!("Failed to publish offline status: {}", e);
            }
        }
        if self.session.phase != SessionPhase::Idle {
            info!("Closing MQTT session");
        }
        self.teardown();
    }

    /// Wait for a session closed by [`shutdown`](Self::shutdown) to flush
    pub async fn finish_close(&mut self) {
        if let Some(closing) = self.transport.take_pending_close() {
            if let Err(e) = closing.await {
                debug!("Session flush task ended abnormally: {}", e);
            }
        }
    }

    fn drain_events(&mut self, now_ms: u64) {
        for _ in 0..MAX_EVENTS_PER_TICK {
            if self.session.phase == SessionPhase::Idle {
                return;
            }
            let Some(event) = self.transport.poll_event() else {
                return;
            };
            self.handle_event(event, now_ms);
        }
    }

    fn handle_event(&mut self, event: SessionEvent, now_ms: u64) {
        match event {
            SessionEvent::Connected => match self.session.phase {
                SessionPhase::Handshaking { .. } => self.on_connack(now_ms),
                _ => debug!("Ignoring ConnAck in phase {}", self.session.phase.name()),
            },
            SessionEvent::Message {
                topic,
                payload,
                retain,
            } => {
                self.session.last_activity_ms = now_ms;
                if MessageHandler::should_forward(&topic, &self.session.subscribed_topics) {
                    self.forwarder.forward(InboundMessage {
                        topic,
                        payload,
                        retain,
                    });
                }
            }
            SessionEvent::Subscribed { count } => {
                self.session.last_activity_ms = now_ms;
                debug!(target: "mqtt_transport", "Subscription confirmed ({} topics)", count);
            }
            SessionEvent::Activity => {
                self.session.last_activity_ms = now_ms;
            }
            SessionEvent::Disconnected(reason) | SessionEvent::TransportError(reason) => {
                self.fail_session(now_ms, &reason);
            }
        }
    }

    fn begin_handshake(&mut self, now_ms: u64) {
        let _span = mqtt_span!(
            broker = %self.session.broker_address,
            client_id = %self.session.client_id
        )
        .entered();

        match self.transport.open() {
            Ok(()) => {
                info!(
                    "Connecting to MQTT broker (attempt {})",
                    self.session.retry_count + 1
                );
                self.transition(
                    SessionPhase::Handshaking {
                        started_at_ms: now_ms,
                    },
                    "open",
                );
            }
            Err(e) => self.fail_session(now_ms, &e.to_string()),
        }
    }

    fn on_connack(&mut self, now_ms: u64) {
        self.session.retry_count = 0;
        self.session.last_activity_ms = now_ms;
        self.transition(SessionPhase::Online, "ConnAck");

        for topic in &self.topics {
            match self.transport.subscribe(topic, self.qos) {
                Ok(()) => {
                    debug!(target: "mqtt_transport", "Subscribed to: {}", topic);
                    self.session.subscribed_topics.insert(topic.clone());
                }
                Err(e) => warn!("Failed to subscribe to {}: {}", topic, e),
            }
        }

        let status_topic = self.identity.status_topic();
        if let Err(e) =
            self.transport
                .publish(&status_topic, STATUS_ONLINE.as_bytes(), self.qos, true)
        {
            warn!("Failed to publish online status: {}", e);
        }
    }

    fn fail_session(&mut self, now_ms: u64, reason: &str) {
        let schedule = HealthMonitor::schedule_retry(self.session.retry_count, &self.policy, now_ms);
        self.transport.close();
        self.session.subscribed_topics.clear();
        self.session.retry_count = schedule.attempt;
        self.session.next_retry_at_ms = schedule.next_retry_at_ms;
        self.transition(SessionPhase::Idle, reason);
        info!(
            "Next MQTT attempt in {}ms (failure {})",
            schedule.delay_ms, schedule.attempt
        );
    }

    fn teardown(&mut self) {
        self.transport.close();
        self.session.subscribed_topics.clear();
        self.transition(SessionPhase::Idle, "closed");
    }

    fn transition(&mut self, next: SessionPhase, reason: &str) {
        let from = self.session.phase;
        self.session.phase = next;
        if from != next {
            HealthMonitor::log_state_transition(from, next, reason);
        }
    }
}
