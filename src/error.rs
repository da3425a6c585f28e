//! Top-level error type for the node
//!
//! Component errors stay specific ([`ConfigError`], [`LinkError`],
//! [`MqttError`], [`InputError`]); [`NodeError`] gathers them at the binary
//! boundary. Nothing in the steady-state loop is fatal, so only startup
//! returns these.

use crate::config::ConfigError;
use crate::connectivity::LinkError;
use crate::sensor::InputError;
use crate::transport::MqttError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network link error: {0}")]
    Link(#[from] LinkError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Motion input error: {0}")]
    Input(#[from] InputError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl NodeError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying later can clear the error
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Link(_) | NodeError::Input(_) => true,
            NodeError::Mqtt(e) => !matches!(e, MqttError::InvalidBrokerUrl(_)),
            NodeError::Config(_) | NodeError::Internal { .. } => false,
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
