//! Payloads published by a sensor node
//!
//! The text payloads are a fixed contract with existing broker consumers and
//! must not change. The JSON form carries the same information for consumers
//! that want the sensor ID and timestamp inline.

use crate::sensor::{MotionEvent, MotionKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text payload for an accepted motion detection
pub const MOTION_DETECTED_TEXT: &str = "motion detected";
/// Text payload for the inactivity timeout
pub const MOTION_STOPPED_TEXT: &str = "no motion detected for sometime";
/// Retained status payload while the session is up
pub const STATUS_ONLINE: &str = "online";
/// Last-will status payload
pub const STATUS_OFFLINE: &str = "offline";

/// Wire format for motion payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionEventType {
    MotionDetected,
    MotionStopped,
}

impl From<MotionKind> for MotionEventType {
    fn from(kind: MotionKind) -> Self {
        match kind {
            MotionKind::Detected => MotionEventType::MotionDetected,
            MotionKind::ActivityStopped => MotionEventType::MotionStopped,
        }
    }
}

impl From<MotionEventType> for MotionKind {
    fn from(event: MotionEventType) -> Self {
        match event {
            MotionEventType::MotionDetected => MotionKind::Detected,
            MotionEventType::MotionStopped => MotionKind::ActivityStopped,
        }
    }
}

/// JSON motion payload
///
/// ```
/// use motion_node::protocol::{MotionEventType, MotionMessage};
///
/// let message = MotionMessage {
///     sensor_id: "hall".to_string(),
///     event: MotionEventType::MotionDetected,
///     timestamp: 1_700_000_000,
/// };
/// let json = serde_json::to_string(&message).unwrap();
/// assert_eq!(json, r#"{"sensorId":"hall","event":"motion_detected","timestamp":1700000000}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionMessage {
    pub sensor_id: String,
    pub event: MotionEventType,
    /// Wall-clock Unix seconds when the event was published
    pub timestamp: i64,
}

/// Render a motion event in the configured format
///
/// The JSON form is stamped with `published_at`; the event's monotonic time
/// only orders events inside the node.
pub fn render_motion_payload(
    event: &MotionEvent,
    format: PayloadFormat,
    sensor_id: &str,
    published_at: DateTime<Utc>,
) -> Result<Vec<u8>, serde_json::Error> {
    match format {
        PayloadFormat::Text => {
            let text = match event.kind {
                MotionKind::Detected => MOTION_DETECTED_TEXT,
                MotionKind::ActivityStopped => MOTION_STOPPED_TEXT,
            };
            Ok(text.as_bytes().to_vec())
        }
        PayloadFormat::Json => serde_json::to_vec(&MotionMessage {
            sensor_id: sensor_id.to_string(),
            event: event.kind.into(),
            timestamp: published_at.timestamp(),
        }),
    }
}

/// Recognize a motion payload in either format
pub fn classify_motion_payload(payload: &[u8]) -> Option<MotionKind> {
    match payload {
        p if p == MOTION_DETECTED_TEXT.as_bytes() => Some(MotionKind::Detected),
        p if p == MOTION_STOPPED_TEXT.as_bytes() => Some(MotionKind::ActivityStopped),
        p => serde_json::from_slice::<MotionMessage>(p)
            .ok()
            .map(|message| message.event.into()),
    }
}
