//! Network configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Ports, timeouts and TLS material shared by every component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// First port of the plaintext worker range
    pub start_port: u16,

    /// First port of the TLS worker range
    pub start_port_tls: u16,

    /// Width of each worker port range
    pub port_count: u16,

    /// Whether workers serve TLS when a certificate is available
    pub tls_by_default: bool,

    /// Timeout for a bare TCP connect (probe and calls)
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Timeout for a complete call
    #[serde(with = "duration_millis")]
    pub call_timeout: Duration,

    /// How often binding a worker port is attempted before giving up
    pub bind_retries: u32,

    /// Backoff between bind attempts
    pub backoff: BackoffConfig,

    /// PEM certificate served by TLS endpoints
    pub certificate_path: PathBuf,

    /// PEM private key matching `certificate_path`
    pub tls_key_path: PathBuf,

    /// Accept self-signed (unverifiable) server certificates
    pub allow_self_signed: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            start_port: 18000,
            start_port_tls: 18100,
            port_count: 100,
            tls_by_default: true,
            connect_timeout: Duration::from_millis(1000),
            call_timeout: Duration::from_millis(5000),
            bind_retries: 10,
            backoff: BackoffConfig::default(),
            certificate_path: config_dir.join("server.cert"),
            tls_key_path: config_dir.join("server.key"),
            allow_self_signed: true,
        }
    }
}

impl NetworkConfig {
    /// Port range `[start, start + count)` for plaintext or TLS workers
    pub fn port_range(&self, tls: bool) -> std::ops::Range<u16> {
        let start = if tls {
            self.start_port_tls
        } else {
            self.start_port
        };
        start..start.saturating_add(self.port_count)
    }

    /// Whether both PEM files for serving TLS exist
    pub fn has_tls_material(&self) -> bool {
        self.certificate_path.exists() && self.tls_key_path.exists()
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0 adds up to 100% of the delay)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 1.0,
        }
    }
}
