//! Multicast discovery configuration

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Multicast group and timing for announcements
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Whether workers announce themselves
    pub enabled: bool,

    /// Multicast group
    pub group: Ipv4Addr,

    /// UDP port of the group
    pub port: u16,

    /// Re-announcement period
    #[serde(with = "duration_millis")]
    pub announce_interval: Duration,

    /// Default observation window of `enumerate`
    #[serde(with = "duration_secs")]
    pub enumerate_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group: Ipv4Addr::new(239, 255, 70, 77),
            port: 17998,
            announce_interval: Duration::from_millis(2000),
            enumerate_timeout: Duration::from_secs(5),
        }
    }
}
