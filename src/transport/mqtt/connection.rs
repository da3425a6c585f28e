//! Broker options, reconnect policy and session phases
//!
//! Everything here is pure: building [`MqttOptions`] from configuration and
//! computing retry delays touches no sockets.

use crate::config::MqttSection;
use crate::connectivity::ConnectivityState;
use crate::protocol::STATUS_OFFLINE;
use rumqttc::Transport as RumqttcTransport;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{MqttOptions, mqttbytes::QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Where a broker session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session; a new one may be opened once the retry delay has passed
    Idle,
    /// `open` issued, waiting for ConnAck
    Handshaking { started_at_ms: u64 },
    /// ConnAck received, publishes allowed
    Online,
}

impl SessionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Handshaking { .. } => "handshaking",
            SessionPhase::Online => "online",
        }
    }
}

/// Delay between failed broker sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Same delay after every failure
    Fixed {
        #[serde(default = "default_fixed_delay_ms")]
        delay_ms: u64,
    },
    /// `base_ms` doubled per consecutive failure, capped at `max_ms`
    Exponential { base_ms: u64, max_ms: u64 },
}

fn default_fixed_delay_ms() -> u64 {
    5_000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            delay_ms: default_fixed_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next session after `attempt` consecutive failures (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        match *self {
            ReconnectPolicy::Fixed { delay_ms } => delay_ms,
            ReconnectPolicy::Exponential { base_ms, max_ms } => {
                let factor = 1u64
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u64::MAX);
                base_ms.saturating_mul(factor).min(max_ms)
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match *self {
            ReconnectPolicy::Fixed { delay_ms: 0 } => {
                Err("reconnect delay_ms must be greater than 0".to_string())
            }
            ReconnectPolicy::Exponential { base_ms: 0, .. } => {
                Err("reconnect base_ms must be greater than 0".to_string())
            }
            ReconnectPolicy::Exponential { base_ms, max_ms } if max_ms < base_ms => Err(format!(
                "reconnect max_ms ({max_ms}) must not be below base_ms ({base_ms})"
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Not connected - link: {link:?}, session online: {session_online}")]
    NotConnected {
        link: ConnectivityState,
        session_online: bool,
    },
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Broker session is closed")]
    SessionClosed,
}

/// Map a configured QoS level to the wire value, clamping unknown levels to 1
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Build rumqttc options for a sensor session
///
/// The last will marks `status_topic` as `offline` (retained) if the node
/// drops off without a clean disconnect.
pub fn configure_mqtt_options(
    client_id: &str,
    status_topic: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let tls = matches!(url.scheme(), "mqtts" | "ssl");
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = match (config.password(), &config.password_env) {
            (Some(password), _) => password,
            (None, Some(env_name)) => {
                warn!(
                    "MQTT password variable {} is not set, connecting without a password",
                    env_name
                );
                String::new()
            }
            (None, None) => String::new(),
        };
        mqtt_options.set_credentials(username, password);
    } else if let Some(env_name) = &config.username_env {
        warn!(
            "MQTT username variable {} is not set, connecting anonymously",
            env_name
        );
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keepalive_secs));
    mqtt_options.set_clean_start(true);

    let lwt = LastWill::new(
        status_topic,
        STATUS_OFFLINE,
        qos_from_level(config.qos),
        true,
        None,
    );
    mqtt_options.set_last_will(lwt);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    #[test]
    fn test_fixed_policy_is_constant() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy, ReconnectPolicy::Fixed { delay_ms: 5_000 });
        assert_eq!(policy.delay_for_attempt(1), 5_000);
        assert_eq!(policy.delay_for_attempt(50), 5_000);
    }

    #[test]
    fn test_exponential_policy_doubles_and_caps() {
        let policy = ReconnectPolicy::Exponential {
            base_ms: 1_000,
            max_ms: 30_000,
        };
        assert_eq!(policy.delay_for_attempt(1), 1_000);
        assert_eq!(policy.delay_for_attempt(2), 2_000);
        assert_eq!(policy.delay_for_attempt(5), 16_000);
        assert_eq!(policy.delay_for_attempt(6), 30_000);
        assert_eq!(policy.delay_for_attempt(u32::MAX), 30_000);
    }

    #[test]
    fn test_policy_validation() {
        assert!(ReconnectPolicy::default().validate().is_ok());
        assert!(ReconnectPolicy::Fixed { delay_ms: 0 }.validate().is_err());
        assert!(
            ReconnectPolicy::Exponential {
                base_ms: 100,
                max_ms: 50
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_policy_deserializes_from_toml() {
        let fixed: ReconnectPolicy = toml::from_str(r#"strategy = "fixed""#).unwrap();
        assert_eq!(fixed, ReconnectPolicy::Fixed { delay_ms: 5_000 });

        let exponential: ReconnectPolicy =
            toml::from_str("strategy = \"exponential\"\nbase_ms = 250\nmax_ms = 8000").unwrap();
        assert_eq!(
            exponential,
            ReconnectPolicy::Exponential {
                base_ms: 250,
                max_ms: 8_000
            }
        );
    }

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_level(9), QoS::AtLeastOnce);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let config = NodeConfig::test_config();
        let options =
            configure_mqtt_options("hall", "sensors/hall/status", &config.mqtt).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.client_id(), "hall");
        assert_eq!(options.keep_alive(), Duration::from_secs(60));

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "sensors/hall/status");
        assert_eq!(will.message, "offline");
        assert!(will.retain);
    }

    #[test]
    fn test_credentials_come_from_named_env_vars() {
        let mut config = NodeConfig::test_config();
        config.mqtt.username_env = Some("MOTION_NODE_TEST_CONN_USER".to_string());
        config.mqtt.password_env = Some("MOTION_NODE_TEST_CONN_PASS".to_string());
        std::env::set_var("MOTION_NODE_TEST_CONN_USER", "sensor");
        std::env::set_var("MOTION_NODE_TEST_CONN_PASS", "s3cret");

        let options = configure_mqtt_options("hall", "sensors/hall/status", &config.mqtt).unwrap();
        assert_eq!(
            options.credentials(),
            Some(("sensor".to_string(), "s3cret".to_string()))
        );

        // A missing password variable still connects, without a password
        std::env::remove_var("MOTION_NODE_TEST_CONN_PASS");
        let options = configure_mqtt_options("hall", "sensors/hall/status", &config.mqtt).unwrap();
        assert_eq!(
            options.credentials(),
            Some(("sensor".to_string(), String::new()))
        );

        std::env::remove_var("MOTION_NODE_TEST_CONN_USER");
        let options = configure_mqtt_options("hall", "sensors/hall/status", &config.mqtt).unwrap();
        assert_eq!(options.credentials(), None);
    }

    #[test]
    fn test_mqtts_defaults_to_tls_port() {
        let mut config = NodeConfig::test_config();
        config.mqtt.broker_url = "mqtts://broker.example.com".to_string();
        let options = configure_mqtt_options("hall", "sensors/hall/status", &config.mqtt).unwrap();
        assert_eq!(
            options.broker_address(),
            ("broker.example.com".to_string(), 8883)
        );
    }

    #[test]
    fn test_invalid_broker_url() {
        let mut config = NodeConfig::test_config();
        config.mqtt.broker_url = "invalid-url".to_string();

        let result = configure_mqtt_options("hall", "sensors/hall/status", &config.mqtt);
        assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::NotConnected {
                link: ConnectivityState::Connecting,
                session_online: false,
            },
            MqttError::ConnectionFailed("test".to_string()),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::SessionClosed,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
