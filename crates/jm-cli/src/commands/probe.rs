//! Port-range probe of one host

use anyhow::Result;
use jm_core::config::NetworkConfig;
use jm_core::probe::probe;
use jm_core::RpcClient;

use crate::output::{print_info, print_warning};

/// Probe the worker port ranges of `host`
pub async fn probe_command(client: &RpcClient, network: &NetworkConfig, host: &str) -> Result<()> {
    let mut found = Vec::new();
    for tls in [false, true] {
        let range = network.port_range(tls);
        let count = range.end.saturating_sub(range.start);
        match probe(client, host, range.start, count).await {
            Some(ports) => found.extend(ports),
            None => {
                print_warning(&format!("{} is unreachable", host));
                return Ok(());
            }
        }
    }

    if found.is_empty() {
        print_info(&format!("No workers on {}", host));
    } else {
        for port in found {
            println!("{}:{}", host, port);
        }
    }
    Ok(())
}
