//! MQTT v5 transport built on rumqttc
//!
//! Pure pieces are split from the I/O so they can be tested without a broker:
//!
//! - [`connection`] - broker options, reconnect policy and session phases
//! - [`message_handler`] - mapping rumqttc events to session events, inbound forwarding
//! - [`health_monitor`] - keepalive and retry decisions
//! - [`client`] - the rumqttc-backed [`BrokerTransport`](crate::transport::BrokerTransport)

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::RumqttTransport;
pub use connection::{
    MqttError, ReconnectPolicy, SessionPhase, configure_mqtt_options, qos_from_level,
};
pub use health_monitor::{HealthMonitor, RetrySchedule};
pub use message_handler::{MessageForwarder, MessageHandler, topic_matches};
