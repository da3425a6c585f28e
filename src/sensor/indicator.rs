//! Optional status output (an LED on the reference hardware)

/// Digital output lit while motion is considered active
pub trait StatusIndicator: Send {
    fn set(&mut self, on: bool);
}

/// Indicator for nodes without a status output
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndicator;

impl StatusIndicator for NoIndicator {
    fn set(&mut self, _on: bool) {}
}
