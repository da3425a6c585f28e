//! Rising-edge capture for the motion input
//!
//! Two ways to feed the detector:
//!
//! - [`InterruptHandle::fire`] from a real edge interrupt. The handle is
//!   cheap to clone and only touches the detector's atomics.
//! - [`DigitalInputLatch::poll`] from the control loop, sampling the pin level
//!   and detecting low-to-high transitions where no interrupt is available.

use super::MotionDetector;
use crate::time::TimeSource;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Failed to read input {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Unexpected input level {0:?}")]
    InvalidLevel(String),
}

/// Digital input pin
pub trait DigitalInput: Send {
    fn is_high(&mut self) -> Result<bool, InputError>;
}

/// Linux GPIO exposed through a sysfs `value` file
#[derive(Debug, Clone)]
pub struct SysfsInput {
    path: PathBuf,
}

impl SysfsInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DigitalInput for SysfsInput {
    fn is_high(&mut self) -> Result<bool, InputError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| InputError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(InputError::InvalidLevel(other.to_string())),
        }
    }
}

/// Interrupt-context entry point into the detector
#[derive(Clone)]
pub struct InterruptHandle {
    detector: Arc<MotionDetector>,
    clock: Arc<dyn TimeSource>,
}

impl InterruptHandle {
    pub fn new(detector: Arc<MotionDetector>, clock: Arc<dyn TimeSource>) -> Self {
        Self { detector, clock }
    }

    /// Rising edge handler. Bounded time, no allocation, no I/O.
    pub fn fire(&self) -> bool {
        self.detector.on_edge(self.clock.now_ms())
    }
}

/// Polled edge latch over a [`DigitalInput`]
pub struct DigitalInputLatch {
    input: Box<dyn DigitalInput>,
    detector: Arc<MotionDetector>,
    last_level: bool,
    read_failing: bool,
}

impl DigitalInputLatch {
    /// The initial level is sampled so a pin that is already high at boot is not an edge.
    pub fn new(mut input: Box<dyn DigitalInput>, detector: Arc<MotionDetector>) -> Self {
        let last_level = input.is_high().unwrap_or(false);
        Self {
            input,
            detector,
            last_level,
            read_failing: false,
        }
    }

    /// Sample the input. Returns true if a rising edge was seen and accepted.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        let level = match self.input.is_high() {
            Ok(level) => {
                if self.read_failing {
                    debug!("Motion input readable again");
                    self.read_failing = false;
                }
                level
            }
            Err(e) => {
                // Logged once per failure streak; the loop polls every few milliseconds.
                if !self.read_failing {
                    warn!("Motion input read failed: {}", e);
                    self.read_failing = true;
                }
                return false;
            }
        };

        let rising = level && !self.last_level;
        self.last_level = level;
        if !rising {
            return false;
        }

        let accepted = self.detector.on_edge(now_ms);
        if !accepted {
            debug!(now_ms, "Motion edge inside debounce window, ignoring");
        }
        accepted
    }
}
