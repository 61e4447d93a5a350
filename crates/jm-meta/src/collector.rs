//! Subnet scans for running workers
//!
//! Every host of every subnet is probed over the worker port ranges; each
//! port that answers `isWorker` is asked for its `ip` and `pid` and
//! registered.

use std::net::Ipv4Addr;

use futures::stream::{self, StreamExt};
use ipnetwork::IpNetwork;
use jm_core::config::NetworkConfig;
use jm_core::probe::probe;
use jm_core::{CallError, EndpointId, RpcClient, Security};
use jm_protocol::WorkerCall;

use crate::registrar::Registrar;

/// Parse a comma-separated list of CIDR subnets, skipping invalid ones
pub fn parse_subnets<S: AsRef<str>>(subnets: &[S]) -> Vec<IpNetwork> {
    subnets
        .iter()
        .flat_map(|list| list.as_ref().split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<IpNetwork>() {
            Ok(network) => Some(network),
            Err(e) => {
                tracing::warn!("Ignoring subnet {:?}: {}", s, e);
                None
            }
        })
        .collect()
}

/// Addresses of a subnet worth probing
///
/// Network and broadcast addresses are skipped where they exist. IPv6
/// subnets are not scanned.
pub fn hosts(network: &IpNetwork) -> Vec<Ipv4Addr> {
    match network {
        IpNetwork::V4(v4) if v4.prefix() >= 31 => v4.iter().collect(),
        IpNetwork::V4(v4) => v4
            .iter()
            .filter(|ip| *ip != v4.network() && *ip != v4.broadcast())
            .collect(),
        IpNetwork::V6(v6) => {
            tracing::warn!("Not scanning IPv6 subnet {}", v6);
            Vec::new()
        }
    }
}

/// Scans subnets and registers the workers it finds
pub struct Collector {
    registrar: Registrar,
    client: RpcClient,
    network: NetworkConfig,
    concurrency: usize,
}

impl Collector {
    /// Create a collector probing the ranges in `network`
    pub fn new(
        registrar: Registrar,
        client: RpcClient,
        network: NetworkConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            registrar,
            client,
            network,
            concurrency: concurrency.max(1),
        }
    }

    /// Scan every subnet; returns the number of workers found
    pub async fn collect(&self, subnets: &[IpNetwork]) -> usize {
        tracing::info!("Collector starting");
        let mut found = 0;

        for subnet in subnets {
            tracing::info!("Collecting in subnet {}", subnet);
            found += stream::iter(hosts(subnet))
                .map(|host| self.collect_host(host.to_string()))
                .buffer_unordered(self.concurrency)
                .fold(0, |total, n| async move { total + n })
                .await;
        }

        tracing::info!("Collector finished, {} servers found", found);
        found
    }

    async fn collect_host(&self, host: String) -> usize {
        let Some(mut ports) = self.probe_range(&host, false).await else {
            tracing::trace!("Collector found nothing at {}", host);
            return 0;
        };
        // Keep plaintext finds even when the TLS range is firewalled
        match self.probe_range(&host, true).await {
            Some(found) => ports.extend(found),
            None => tracing::debug!("TLS range of {} unreachable", host),
        }
        if !ports.is_empty() {
            tracing::debug!("Collector found {:?} at {}", ports, host);
        }

        let mut registered = 0;
        for port in ports {
            match self.identify(&host, port).await {
                Ok((ip, pid)) => {
                    self.registrar.register(&ip, pid, port).await;
                    registered += 1;
                }
                Err(e) => tracing::warn!("Failed to identify {}:{}: {}", host, port, e),
            }
        }
        registered
    }

    async fn probe_range(&self, host: &str, tls: bool) -> Option<Vec<u16>> {
        let range = self.network.port_range(tls);
        let count = range.end.saturating_sub(range.start);
        probe(&self.client, host, range.start, count).await
    }

    async fn identify(&self, host: &str, port: u16) -> Result<(String, u32), CallError> {
        let endpoint = EndpointId::new(host, port);
        let ip = self
            .client
            .call_as::<String, _>(&endpoint, Security::Auto, &WorkerCall::Ip)
            .await?;
        let pid = self
            .client
            .call_as::<u32, _>(&endpoint, Security::Auto, &WorkerCall::Pid)
            .await?;
        Ok((ip, pid))
    }
}
