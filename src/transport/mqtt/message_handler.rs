//! Routing rumqttc events and forwarding inbound publishes
//!
//! [`MessageHandler`] is pure. [`MessageForwarder`] hands messages to an
//! external consumer without ever waiting on it.

use crate::transport::{InboundMessage, SessionEvent};
use rumqttc::v5::Event;
use rumqttc::v5::mqttbytes::v5::Packet;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

pub struct MessageHandler;

impl MessageHandler {
    /// Map a rumqttc event to a session event; outgoing traffic maps to `None`
    pub fn route_mqtt_event(event: &Event) -> Option<SessionEvent> {
        match event {
            Event::Incoming(incoming) => Some(match incoming {
                Packet::ConnAck(_) => SessionEvent::Connected,
                Packet::Publish(publish) => SessionEvent::Message {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(disconnect) => SessionEvent::Disconnected(format!(
                    "broker disconnect: {:?}",
                    disconnect.reason_code
                )),
                Packet::SubAck(suback) => SessionEvent::Subscribed {
                    count: suback.return_codes.len(),
                },
                _ => SessionEvent::Activity,
            }),
            Event::Outgoing(_) => None,
        }
    }

    /// Decide whether an inbound publish belongs to one of our subscriptions
    pub fn should_forward<'a>(
        topic: &str,
        subscriptions: impl IntoIterator<Item = &'a String>,
    ) -> bool {
        let matched = subscriptions
            .into_iter()
            .any(|filter| topic_matches(filter, topic));
        if !matched {
            debug!("Ignoring message on unsubscribed topic: {}", topic);
        }
        matched
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Forwards inbound publishes to an optional consumer channel
#[derive(Default)]
pub struct MessageForwarder {
    sender: Option<mpsc::Sender<InboundMessage>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self { sender: None }
    }

    pub fn set_sender(&mut self, sender: mpsc::Sender<InboundMessage>) {
        self.sender = Some(sender);
    }

    /// Hand a message to the consumer; returns false if it was dropped
    pub fn forward(&self, message: InboundMessage) -> bool {
        let Some(sender) = &self.sender else {
            warn!(
                "Received message on {} but no consumer configured - message dropped",
                message.topic
            );
            return false;
        };

        match sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!("Inbound queue full - dropping message on {}", message.topic);
                false
            }
            Err(TrySendError::Closed(message)) => {
                warn!("Inbound consumer gone - dropping message on {}", message.topic);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::QoS;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish,
    };

    fn inbound(topic: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: b"{}".to_vec(),
            retain: true,
        }
    }

    #[test]
    fn test_route_mqtt_event() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            Some(SessionEvent::Connected)
        );

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            Some(SessionEvent::Disconnected(_))
        ));

        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: Bytes::from("sensors/hall/config"),
            pkid: 1,
            payload: Bytes::from("{\"window\":1}"),
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&publish),
            Some(SessionEvent::Message {
                topic: "sensors/hall/config".to_string(),
                payload: b"{\"window\":1}".to_vec(),
                retain: true,
            })
        );

        let ping = Event::Incoming(Packet::PingResp(rumqttc::v5::mqttbytes::v5::PingResp));
        assert_eq!(
            MessageHandler::route_mqtt_event(&ping),
            Some(SessionEvent::Activity)
        );
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("sensors/hall/config", "sensors/hall/config"));
        assert!(topic_matches("sensors/+/motion", "sensors/hall/motion"));
        assert!(topic_matches("sensors/#", "sensors/hall/status"));
        assert!(topic_matches("#", "anything/at/all"));

        assert!(!topic_matches("sensors/+/motion", "sensors/hall/status"));
        assert!(!topic_matches("sensors/+", "sensors/hall/motion"));
        assert!(!topic_matches("sensors/hall", "sensors/hall/motion"));
    }

    #[test]
    fn test_should_forward() {
        let subscriptions = vec!["sensors/hall/config".to_string()];
        assert!(MessageHandler::should_forward(
            "sensors/hall/config",
            &subscriptions
        ));
        assert!(!MessageHandler::should_forward(
            "sensors/kitchen/config",
            &subscriptions
        ));
    }

    #[tokio::test]
    async fn test_message_forwarder() {
        let mut forwarder = MessageForwarder::new();
        assert!(!forwarder.forward(inbound("a")));

        let (tx, mut rx) = mpsc::channel(1);
        forwarder.set_sender(tx);

        assert!(forwarder.forward(inbound("a")));
        // Queue full, dropped without waiting
        assert!(!forwarder.forward(inbound("b")));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "a");

        drop(rx);
        assert!(!forwarder.forward(inbound("c")));
    }
}
