//! Cooperative control loop
//!
//! One iteration, in order:
//!
//! 1. advance the network link
//! 2. advance the broker session
//! 3. sample the motion input (when polled) and drain an accepted detection
//! 4. check for inactivity
//! 5. indicator auto-off and watchdog feed
//!
//! Nothing in an iteration waits on I/O. Publishing is best effort: a message
//! that cannot be sent is logged and dropped.

use crate::config::{ConfigError, NodeConfig};
use crate::connectivity::{ConnectivityManager, NetworkLink};
use crate::messaging::MessagingClient;
use crate::motion_span;
use crate::protocol::{PayloadFormat, render_motion_payload};
use crate::sensor::{
    DigitalInput, DigitalInputLatch, InactivityMonitor, InterruptHandle, MotionDetector,
    MotionEvent, MotionKind, NoIndicator, StatusIndicator,
};
use crate::time::TimeSource;
use crate::transport::mqtt::MqttError;
use crate::transport::{BrokerTransport, InboundMessage};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Liveness checkpoint, fed once per iteration
pub trait Watchdog: Send {
    fn feed(&mut self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn feed(&mut self) {}
}

/// What one iteration produced
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IterationOutcome {
    pub detected: Option<MotionEvent>,
    pub stopped: Option<MotionEvent>,
    /// Events that could not be published and were dropped
    pub publish_failures: u32,
}

pub struct ControlLoop<L: NetworkLink, T: BrokerTransport> {
    connectivity: ConnectivityManager<L>,
    messaging: MessagingClient<T>,
    detector: Arc<MotionDetector>,
    latch: Option<DigitalInputLatch>,
    inactivity: InactivityMonitor,
    indicator: Box<dyn StatusIndicator>,
    indicator_on: bool,
    indicator_hold_ms: u64,
    watchdog: Box<dyn Watchdog>,
    clock: Arc<dyn TimeSource>,
    payload_format: PayloadFormat,
    loop_interval: Duration,
    sensor_id: String,
    motion_topic: String,
}

impl<L: NetworkLink, T: BrokerTransport> ControlLoop<L, T> {
    pub fn new(
        config: &NodeConfig,
        link: L,
        transport: T,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        let identity = config.identity()?;
        let connectivity =
            ConnectivityManager::new(link, config.link_credentials()?, config.network.clone());
        let messaging = MessagingClient::new(
            &config.mqtt,
            config.client_id(),
            identity.clone(),
            transport,
            connectivity.subscribe(),
        );

        Ok(Self {
            connectivity,
            messaging,
            detector: Arc::new(MotionDetector::new(config.motion.debounce_window_ms)),
            latch: None,
            inactivity: InactivityMonitor::new(config.motion.inactivity_threshold_ms),
            indicator: Box::new(NoIndicator),
            indicator_on: false,
            indicator_hold_ms: config.motion.indicator_hold_ms(),
            watchdog: Box::new(NoopWatchdog),
            clock,
            payload_format: config.mqtt.payload_format,
            loop_interval: Duration::from_millis(config.control.loop_interval_ms),
            sensor_id: identity.sensor_id().to_string(),
            motion_topic: identity.motion_topic(),
        })
    }

    /// Poll `input` for rising edges every iteration
    pub fn with_input(mut self, input: Box<dyn DigitalInput>) -> Self {
        self.latch = Some(DigitalInputLatch::new(input, self.detector.clone()));
        self
    }

    pub fn with_indicator(mut self, indicator: Box<dyn StatusIndicator>) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn with_watchdog(mut self, watchdog: Box<dyn Watchdog>) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn with_inbound_sender(mut self, sender: mpsc::Sender<InboundMessage>) -> Self {
        self.messaging.set_inbound_sender(sender);
        self
    }

    /// Handle for an edge interrupt; safe to call from any thread
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle::new(self.detector.clone(), self.clock.clone())
    }

    pub fn detector(&self) -> &Arc<MotionDetector> {
        &self.detector
    }

    pub fn connectivity(&self) -> &ConnectivityManager<L> {
        &self.connectivity
    }

    pub fn messaging(&self) -> &MessagingClient<T> {
        &self.messaging
    }

    pub fn inactivity(&self) -> &InactivityMonitor {
        &self.inactivity
    }

    pub fn run_iteration(&mut self, now_ms: u64) -> IterationOutcome {
        let mut outcome = IterationOutcome::default();

        self.connectivity.tick(now_ms);
        self.messaging.tick(now_ms);

        if let Some(latch) = self.latch.as_mut() {
            latch.poll(now_ms);
        }

        if let Some(event) = self.detector.take_pending() {
            let _span = motion_span!(timestamp_ms = event.timestamp_ms).entered();
            info!("Motion detected");
            self.inactivity.on_motion(now_ms);
            self.set_indicator(true);
            if !self.publish_event(&event) {
                outcome.publish_failures += 1;
            }
            outcome.detected = Some(event);
        }

        if let Some(event) = self.inactivity.tick(now_ms) {
            let _span = motion_span!(timestamp_ms = event.timestamp_ms).entered();
            info!(
                "No motion for {}ms since {}",
                now_ms.saturating_sub(self.inactivity.last_motion_ms()),
                self.inactivity.last_motion_ms()
            );
            if !self.publish_event(&event) {
                outcome.publish_failures += 1;
            }
            outcome.stopped = Some(event);
        }

        if self.indicator_on && !self.indicator_hold_active(now_ms) {
            self.set_indicator(false);
        }
        self.watchdog.feed();

        outcome
    }

    /// Run iterations every `loop_interval_ms` until `shutdown` resolves, then
    /// close the broker session.
    ///
    /// ```
    /// # use motion_node::{ControlLoop, NodeConfig};
    /// # use motion_node::connectivity::HostLink;
    /// # use motion_node::testing::MockTransport;
    /// # use motion_node::time::MonotonicClock;
    /// # use std::sync::Arc;
    /// # use std::time::Duration;
    /// # let config = NodeConfig::from_toml_str(r#"
    /// #     [sensor]
    /// #     id = "porch"
    /// #     [wifi]
    /// #     ssid = "home"
    /// #     [mqtt]
    /// #     broker_url = "mqtt://localhost:1883"
    /// # "#).unwrap();
    /// let transport = MockTransport::with_auto_connack();
    /// let clock = Arc::new(MonotonicClock::new());
    /// let mut node = ControlLoop::new(&config, HostLink::new(), transport.clone(), clock).unwrap();
    ///
    /// tokio_test::block_on(async {
    ///     node.run_until(tokio::time::sleep(Duration::from_millis(100))).await;
    /// });
    ///
    /// assert!(!transport.is_open());
    /// assert_eq!(
    ///     transport.published_to("sensors/porch/status").last().map(Vec::as_slice),
    ///     Some(&b"offline"[..])
    /// );
    /// ```
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.loop_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "Control loop running every {}ms, publishing to {}",
            self.loop_interval.as_millis(),
            self.motion_topic
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping control loop");
                    break;
                }
                _ = interval.tick() => {
                    let now_ms = self.clock.now_ms();
                    self.run_iteration(now_ms);
                }
            }
        }

        self.messaging.shutdown();
        self.set_indicator(false);
        self.messaging.finish_close().await;
    }

    fn indicator_hold_active(&self, now_ms: u64) -> bool {
        self.detector
            .last_trigger_ms()
            .is_some_and(|at| now_ms.saturating_sub(at) < self.indicator_hold_ms)
    }

    fn set_indicator(&mut self, on: bool) {
        if self.indicator_on != on {
            self.indicator.set(on);
            self.indicator_on = on;
        }
    }

    /// Returns false if the event was dropped
    fn publish_event(&mut self, event: &MotionEvent) -> bool {
        let payload = match render_motion_payload(
            event,
            self.payload_format,
            &self.sensor_id,
            chrono::Utc::now(),
        ) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode motion payload: {}", e);
                return false;
            }
        };

        match self.messaging.publish(&self.motion_topic, &payload) {
            Ok(()) => {
                debug!("Published {:?} to {}", event.kind, self.motion_topic);
                true
            }
            Err(MqttError::NotConnected { link, .. }) => {
                warn!(
                    "Not connected (link {:?}), dropping {} event",
                    link,
                    kind_label(event.kind)
                );
                false
            }
            Err(e) => {
                warn!("Publish failed, dropping {} event: {}", kind_label(event.kind), e);
                false
            }
        }
    }
}

fn kind_label(kind: MotionKind) -> &'static str {
    match kind {
        MotionKind::Detected => "motion",
        MotionKind::ActivityStopped => "inactivity",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::HostLink;
    use crate::testing::mocks::{CountingWatchdog, MockTransport, RecordingIndicator};
    use crate::time::ManualClock;

    fn node(
        transport: MockTransport,
    ) -> (ControlLoop<HostLink, MockTransport>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let node = ControlLoop::new(
            &NodeConfig::test_config(),
            HostLink::new(),
            transport,
            clock.clone(),
        )
        .unwrap();
        (node, clock)
    }

    #[test]
    fn test_first_iteration_connects_link_and_opens_session() {
        let transport = MockTransport::with_auto_connack();
        let (mut node, _clock) = node(transport.clone());

        node.run_iteration(0);
        assert_eq!(transport.open_calls(), 1);
        assert!(!node.messaging().is_connected());

        node.run_iteration(10);
        assert!(node.messaging().is_connected());
    }

    #[test]
    fn test_motion_while_offline_is_dropped() {
        let transport = MockTransport::new();
        let (mut node, _clock) = node(transport.clone());
        transport.fail_open(true);

        node.interrupt_handle().fire();
        let outcome = node.run_iteration(0);

        assert_eq!(outcome.detected, Some(MotionEvent::detected(0)));
        assert_eq!(outcome.publish_failures, 1);
        assert!(transport.published().is_empty());
        // Inactivity is armed even though nothing was sent
        assert!(node.inactivity().is_armed());
    }

    #[test]
    fn test_indicator_follows_hold_time() {
        let indicator = RecordingIndicator::new();
        let (node, _clock) = node(MockTransport::with_auto_connack());
        let mut node = node.with_indicator(Box::new(indicator.clone()));

        node.interrupt_handle().fire();
        node.run_iteration(0);
        assert!(indicator.is_on());

        node.run_iteration(119_999);
        assert!(indicator.is_on());

        node.run_iteration(120_000);
        assert_eq!(indicator.states(), vec![true, false]);
    }

    #[test]
    fn test_watchdog_fed_every_iteration() {
        let watchdog = CountingWatchdog::new();
        let (node, _clock) = node(MockTransport::new());
        let mut node = node.with_watchdog(Box::new(watchdog.clone()));

        for now in 0..5 {
            node.run_iteration(now * 10);
        }
        assert_eq!(watchdog.feeds(), 5);
    }

    #[tokio::test]
    async fn test_run_until_stops_and_closes_session() {
        let transport = MockTransport::with_auto_connack();
        let (mut node, clock) = node(transport.clone());
        clock.set(1);

        node.run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert!(!node.messaging().is_connected());
        assert!(transport.close_calls() >= 1);
        assert_eq!(
            transport.published_to("sensors/test-sensor/status"),
            vec![b"online".to_vec(), b"offline".to_vec()]
        );
    }
}
