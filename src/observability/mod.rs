//! Observability: structured logging setup and span macros

pub mod logging;

pub use logging::{LogFormat, init_default_logging, init_logging, parse_level};

// Span macros for structured logging
pub use logging::{link_span, motion_span, mqtt_span};
