//! Meta-server configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::types::EndpointId;

/// Where the meta-server lives and how it maintains its directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Address workers register with
    pub address: String,

    /// Port of the meta-server
    pub port: u16,

    /// Address the meta-server binds to
    pub bind_address: String,

    /// Whether the meta-server endpoint uses TLS
    pub tls: bool,

    /// Interval of the validation loop
    #[serde(with = "duration_secs")]
    pub validation_interval: Duration,

    /// Entries validated in parallel
    pub validation_concurrency: usize,

    /// Subnets (CIDR) scanned at startup and by `collect`
    pub search_subnets: Vec<String>,

    /// Hosts probed in parallel during a scan
    pub scan_concurrency: usize,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 17999,
            bind_address: "0.0.0.0".to_string(),
            tls: false,
            validation_interval: Duration::from_secs(30),
            validation_concurrency: 16,
            search_subnets: Vec::new(),
            scan_concurrency: 32,
        }
    }
}

impl MetaConfig {
    /// Endpoint of the meta-server
    pub fn endpoint(&self) -> EndpointId {
        EndpointId::new(self.address.clone(), self.port)
    }
}
