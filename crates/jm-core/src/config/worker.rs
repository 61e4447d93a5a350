//! Worker server configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Behaviour of the RPC endpoint embedded in a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Capacity of the recent-output ring
    pub ring_lines: usize,

    /// Delay between binding and announcing/registering
    #[serde(with = "duration_millis")]
    pub registration_delay: Duration,

    /// Push a registration to the meta-server
    pub register: bool,

    /// Address the RPC port binds to
    pub bind_address: String,

    /// Address reported to the meta-server and in announcements
    ///
    /// Detected from the routing table when unset.
    pub advertise_address: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ring_lines: 100,
            registration_delay: Duration::from_millis(5000),
            register: true,
            bind_address: "0.0.0.0".to_string(),
            advertise_address: None,
        }
    }
}

/// Parameters of the output-gap liveness heuristic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Gap tolerated before any output gap has been measured
    #[serde(with = "duration_secs")]
    pub max_time_start: Duration,

    /// Factor applied to the longest gap seen
    pub margin: f64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            max_time_start: Duration::from_secs(30),
            margin: 1.1,
        }
    }
}
