//! rumqttc-backed broker transport
//!
//! `open` creates a fresh `AsyncClient`/`EventLoop` pair and spawns a task that
//! polls the event loop, forwarding session events over an unbounded channel.
//! The control loop only ever `try_recv`s from that channel. The task stops on
//! the first error or broker disconnect, so a dead session is never resumed.
//! `close` lets the task flush queued requests before it ends.

use super::connection::{MqttError, configure_mqtt_options};
use super::message_handler::MessageHandler;
use crate::config::MqttSection;
use crate::transport::{BrokerTransport, QoS, SessionEvent};
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Request queue depth between the client handle and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Upper bound on flushing queued requests after `close`
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

pub struct RumqttTransport {
    options: MqttOptions,
    client: Option<AsyncClient>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    event_loop_handle: Option<JoinHandle<()>>,
    closing: Option<JoinHandle<()>>,
}

impl RumqttTransport {
    pub fn new(options: MqttOptions) -> Self {
        Self {
            options,
            client: None,
            events_rx: None,
            event_loop_handle: None,
            closing: None,
        }
    }

    pub fn from_config(
        client_id: &str,
        status_topic: &str,
        config: &MqttSection,
    ) -> Result<Self, MqttError> {
        Ok(Self::new(configure_mqtt_options(
            client_id,
            status_topic,
            config,
        )?))
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    fn client(&self) -> Result<&AsyncClient, MqttError> {
        self.client.as_ref().ok_or(MqttError::SessionClosed)
    }

    async fn drive_event_loop(
        mut event_loop: EventLoop,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    let Some(session_event) = MessageHandler::route_mqtt_event(&event) else {
                        continue;
                    };
                    let finished = matches!(session_event, SessionEvent::Disconnected(_));
                    if events_tx.send(session_event).is_err() || finished {
                        break;
                    }
                }
                Err(e) => {
                    debug!(target: "mqtt_transport", "MQTT event loop error: {}", e);
                    let _ = events_tx.send(SessionEvent::TransportError(e.to_string()));
                    break;
                }
            }
        }
        debug!(target: "mqtt_transport", "MQTT event loop task stopped");
    }
}

impl BrokerTransport for RumqttTransport {
    fn open(&mut self) -> Result<(), MqttError> {
        let runtime = Handle::try_current()
            .map_err(|e| MqttError::ConnectionFailed(format!("no tokio runtime: {e}")))?;

        self.close();

        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = runtime.spawn(Self::drive_event_loop(event_loop, events_tx));

        let (host, port) = self.options.broker_address();
        info!("Opening MQTT session to {}:{}", host, port);

        self.client = Some(client);
        self.events_rx = Some(events_rx);
        self.event_loop_handle = Some(handle);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.as_mut()?.try_recv().ok()
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.client()?
            .try_publish(topic, qos, retain, payload.to_vec())
            .map_err(|e| MqttError::PublishFailed(e.to_string().into()))
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.client()?
            .try_subscribe(topic, qos)
            .map_err(|e| MqttError::SubscriptionFailed(e.to_string().into()))
    }

    /// Queue a DISCONNECT and let the event loop flush it
    ///
    /// Dropping the client closes the request channel, so the loop ends on its
    /// own once every queued request is written. It is aborted if that takes
    /// longer than [`CLOSE_DRAIN_TIMEOUT`].
    fn close(&mut self) {
        let disconnect_queued = match self.client.take() {
            Some(client) => match client.try_disconnect() {
                Ok(()) => true,
                Err(e) => {
                    debug!(target: "mqtt_transport", "Disconnect request not queued: {}", e);
                    false
                }
            },
            None => false,
        };
        let events_rx = self.events_rx.take();
        let Some(handle) = self.event_loop_handle.take() else {
            return;
        };

        match Handle::try_current() {
            Ok(runtime) if disconnect_queued => {
                self.closing = Some(runtime.spawn(async move {
                    // Keep the receiver alive so the loop is not cut short
                    let _events_rx = events_rx;
                    let abort = handle.abort_handle();
                    if tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, handle).await.is_err() {
                        debug!(target: "mqtt_transport", "Session did not drain in time, aborting");
                        abort.abort();
                    }
                }));
            }
            _ => handle.abort(),
        }
    }

    fn take_pending_close(&mut self) -> Option<JoinHandle<()>> {
        self.closing.take()
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            warn!("MQTT transport dropped with a live session");
            handle.abort();
        }
    }
}
