//! Directory commands answered by the meta-server

use anyhow::{Context, Result};
use jm_core::{EndpointId, RpcClient, Security, WorkerRecord};
use jm_protocol::MetaCall;
use std::collections::BTreeMap;

use crate::output::{format_workers, print_error, print_success};

/// Print the meta-server's directory, optionally filtered
pub async fn list_command(
    client: &RpcClient,
    meta: &EndpointId,
    security: Security,
    filter: Option<&str>,
    long: bool,
) -> Result<()> {
    let listing: BTreeMap<String, WorkerRecord> = match client
        .call_as(meta, security, &MetaCall::List)
        .await
    {
        Ok(listing) => listing,
        Err(e) => {
            print_error(&format!("Failed to reach meta-server {}: {}", meta, e));
            return Err(e).context("Listing workers failed");
        }
    };

    let workers: Vec<WorkerRecord> = listing
        .into_values()
        .filter(|w| match filter {
            Some(filter) => {
                w.endpoint.host.contains(filter)
                    || w.metadata.hostname.contains(filter)
                    || w.metadata.user.contains(filter)
                    || w.metadata.job_name.contains(filter)
                    || w.metadata.command_line.contains(filter)
            }
            None => true,
        })
        .collect();

    println!("{}", format_workers(&workers, long));
    Ok(())
}

/// Ask the meta-server to scan subnets in the background
pub async fn scan_command(
    client: &RpcClient,
    meta: &EndpointId,
    security: Security,
    subnets: &[String],
) -> Result<()> {
    let call = if subnets.is_empty() {
        MetaCall::Collect
    } else {
        MetaCall::Scan {
            subnets: Some(subnets.join(",")),
        }
    };

    client
        .call(meta, security, &call)
        .await
        .with_context(|| format!("Failed to reach meta-server {}", meta))?;
    print_success("Scan started; run 'jobmesh list' in a while");
    Ok(())
}
