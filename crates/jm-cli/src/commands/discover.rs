//! Multicast discovery

use std::time::Duration;

use anyhow::{Context, Result};
use jm_core::config::DiscoveryConfig;
use jm_core::discovery::enumerate;
use jm_core::RpcClient;

use crate::output::format_discovered;

/// Enumerate announced workers for `window`
pub async fn discover_command(
    config: &DiscoveryConfig,
    client: &RpcClient,
    window: Duration,
) -> Result<()> {
    tracing::info!("Listening for announcements for {:?}", window);
    let found = enumerate(config, client, window)
        .await
        .context("Multicast discovery failed")?;
    println!("{}", format_discovered(&found));
    Ok(())
}
