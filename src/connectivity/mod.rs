//! Network link management

pub mod link;
pub mod manager;

pub use link::{HostLink, LinkCredentials, LinkError, LinkStatus, NetworkLink};
pub use manager::{ConnectivityManager, ConnectivityState};
