//! Topic construction and sensor ID validation
//!
//! Every topic a node touches is derived from its [`SensorIdentity`]:
//! `{prefix}/{sensor_id}/motion`, `/status` and `/config`.

use thiserror::Error;

/// Normalize a topic: collapse repeated slashes, drop leading and trailing ones
pub fn canonicalize_topic(topic: &str) -> String {
    topic
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn validate_sensor_id(sensor_id: &str) -> Result<(), ValidationError> {
    if sensor_id.is_empty() {
        return Err(ValidationError::EmptySensorId);
    }

    for ch in sensor_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidSensorIdChar(ch));
        }
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Sensor ID cannot be empty")]
    EmptySensorId,
    #[error("Sensor ID contains invalid character: '{0}'")]
    InvalidSensorIdChar(char),
    #[error("Topic prefix may not contain wildcards: {0}")]
    WildcardInPrefix(String),
}

/// Immutable identity a node publishes under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorIdentity {
    sensor_id: String,
    topic_prefix: String,
}

impl SensorIdentity {
    pub fn new(sensor_id: &str, topic_prefix: &str) -> Result<Self, ValidationError> {
        validate_sensor_id(sensor_id)?;
        if topic_prefix.contains(['+', '#']) {
            return Err(ValidationError::WildcardInPrefix(topic_prefix.to_string()));
        }

        Ok(Self {
            sensor_id: sensor_id.to_string(),
            topic_prefix: canonicalize_topic(topic_prefix),
        })
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// `{prefix}/{sensor_id}/motion`
    pub fn motion_topic(&self) -> String {
        self.topic("motion")
    }

    /// `{prefix}/{sensor_id}/status`
    pub fn status_topic(&self) -> String {
        self.topic("status")
    }

    /// `{prefix}/{sensor_id}/config`
    pub fn config_topic(&self) -> String {
        self.topic("config")
    }

    fn topic(&self, leaf: &str) -> String {
        canonicalize_topic(&format!("{}/{}/{leaf}", self.topic_prefix, self.sensor_id))
    }
}
