//! Motion sensor node
//!
//! Detects motion from a digital rising edge, debounces it, keeps a network
//! link and an MQTT session alive, and publishes motion events. After a
//! configurable quiet period it publishes a single "stopped" event.
//!
//! Everything runs from one cooperative [`ControlLoop`]; no component waits
//! on I/O inside a tick. The only state shared with interrupt context is the
//! [`MotionDetector`](sensor::MotionDetector)'s atomics.
//!
//! # Quick Start
//!
//! ```rust
//! use motion_node::config::NodeConfig;
//! use motion_node::connectivity::HostLink;
//! use motion_node::testing::MockTransport;
//! use motion_node::time::ManualClock;
//! use motion_node::ControlLoop;
//! use std::sync::Arc;
//!
//! let config = NodeConfig::from_toml_str(r#"
//!     [sensor]
//!     id = "hallway"
//!
//!     [wifi]
//!     ssid = "home"
//!
//!     [mqtt]
//!     broker_url = "mqtt://localhost:1883"
//! "#).unwrap();
//!
//! let transport = MockTransport::with_auto_connack();
//! let clock = Arc::new(ManualClock::new(0));
//! let mut node = ControlLoop::new(&config, HostLink::new(), transport.clone(), clock).unwrap();
//!
//! node.run_iteration(0);
//! node.run_iteration(10);
//! node.interrupt_handle().fire();
//! let outcome = node.run_iteration(20);
//!
//! assert!(outcome.detected.is_some());
//! assert_eq!(
//!     transport.published_to("sensors/hallway/motion"),
//!     vec![b"motion detected".to_vec()]
//! );
//! ```

pub mod config;
pub mod connectivity;
pub mod error;
pub mod messaging;
pub mod node;
pub mod observability;
pub mod protocol;
pub mod sensor;
pub mod testing;
pub mod time;
pub mod transport;

pub use config::{ConfigError, NodeConfig};
pub use error::{NodeError, NodeResult};
pub use node::{ControlLoop, IterationOutcome, NoopWatchdog, Watchdog};
pub use protocol::*;
