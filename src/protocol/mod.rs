//! Topic layout and payload formats shared by the node and its consumers

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
