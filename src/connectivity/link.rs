//! Network link abstraction
//!
//! The wireless driver sits behind [`NetworkLink`]. Calls must return
//! promptly: association progress is observed through [`NetworkLink::status`]
//! on later ticks, never waited for.

use thiserror::Error;
use tracing::debug;

/// Credentials handed to the link on every association attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCredentials {
    pub ssid: String,
    pub password: Option<String>,
}

/// Raw link status as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// No association in progress
    Idle,
    /// Association started, not yet usable
    Associating,
    /// Link is up and routable
    Up,
    /// The driver gave up on the current association
    Failed,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("No SSID configured")]
    MissingSsid,
    #[error("Link driver rejected association: {0}")]
    Rejected(String),
}

pub trait NetworkLink: Send {
    /// Start associating. Must not wait for the result.
    fn begin(&mut self, credentials: &LinkCredentials) -> Result<(), LinkError>;

    fn status(&self) -> LinkStatus;

    /// Drop any association, stale or in progress
    fn disconnect(&mut self);
}

/// Link for hosts where the operating system owns the network.
///
/// Association is a formality: once begun the link reports `Up` until
/// disconnected.
#[derive(Debug, Default)]
pub struct HostLink {
    up: bool,
}

impl HostLink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NetworkLink for HostLink {
    fn begin(&mut self, credentials: &LinkCredentials) -> Result<(), LinkError> {
        if credentials.ssid.trim().is_empty() {
            return Err(LinkError::MissingSsid);
        }
        debug!(ssid = %credentials.ssid, "Host link managed by the OS, marking up");
        self.up = true;
        Ok(())
    }

    fn status(&self) -> LinkStatus {
        if self.up {
            LinkStatus::Up
        } else {
            LinkStatus::Idle
        }
    }

    fn disconnect(&mut self) {
        self.up = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(ssid: &str) -> LinkCredentials {
        LinkCredentials {
            ssid: ssid.to_string(),
            password: None,
        }
    }

    #[test]
    fn test_host_link_lifecycle() {
        let mut link = HostLink::new();
        assert_eq!(link.status(), LinkStatus::Idle);

        link.begin(&credentials("home")).unwrap();
        assert_eq!(link.status(), LinkStatus::Up);

        link.disconnect();
        assert_eq!(link.status(), LinkStatus::Idle);
    }

    #[test]
    fn test_host_link_requires_ssid() {
        let mut link = HostLink::new();
        assert!(matches!(
            link.begin(&credentials("  ")),
            Err(LinkError::MissingSsid)
        ));
        assert_eq!(link.status(), LinkStatus::Idle);
    }
}
