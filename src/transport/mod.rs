//! Broker transport abstraction
//!
//! The messaging client drives a [`BrokerTransport`] from the control loop.
//! Every method must return without waiting on the network: connection
//! progress and inbound traffic surface later through
//! [`BrokerTransport::poll_event`].

pub mod mqtt;

pub use mqtt::{MqttError, RumqttTransport};
pub use rumqttc::v5::mqttbytes::QoS;
use tokio::task::JoinHandle;

/// Events observed on a broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Broker accepted the session (ConnAck)
    Connected,
    /// Publish received on a subscribed topic
    Message {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// Any other broker traffic, such as a ping response
    Activity,
    /// Subscription acknowledged
    Subscribed { count: usize },
    /// Broker closed the session
    Disconnected(String),
    /// Network or protocol failure; the session is gone
    TransportError(String),
}

/// Message handed to the inbound consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Non-blocking broker session
///
/// Implementations start a fresh session on every [`open`](Self::open); a
/// previous session is never resumed.
pub trait BrokerTransport: Send {
    /// Begin a new session handshake
    fn open(&mut self) -> Result<(), MqttError>;

    /// Next pending session event, if any
    fn poll_event(&mut self) -> Option<SessionEvent>;

    /// Enqueue a publish
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError>;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    /// Drop the session and discard undelivered events
    fn close(&mut self);

    /// Background flush still running after [`close`](Self::close), if any
    ///
    /// Awaiting it is bounded; callers that exit right after closing should.
    fn take_pending_close(&mut self) -> Option<JoinHandle<()>> {
        None
    }
}
