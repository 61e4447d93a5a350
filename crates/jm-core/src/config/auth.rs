//! Authentication configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Key pair location and challenge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Directory holding `id_ed25519` and `authorized_keys`
    pub key_dir: PathBuf,

    /// Attach a challenge to outgoing calls
    pub send_credentials: bool,

    /// Oldest challenge a server accepts
    #[serde(with = "duration_secs")]
    pub max_challenge_age: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            key_dir: super::default_config_dir().join("auth"),
            send_credentials: true,
            max_challenge_age: Duration::from_secs(300),
        }
    }
}
