//! Calling worker methods

use anyhow::{Context, Result};
use jm_core::{EndpointId, RpcClient, Security};
use jm_protocol::{MetaCall, NOT_AUTHENTICATED};
use serde_json::Value;

use crate::call::parse_call;
use crate::output::{format_value, print_warning};

/// Call a method on a worker directly
pub async fn call_command(
    client: &RpcClient,
    worker: &EndpointId,
    security: Security,
    method: &str,
    args: &[String],
) -> Result<()> {
    let call = parse_call(method, args)?;
    let value = client
        .call(worker, security, &call)
        .await
        .with_context(|| format!("{} on {} failed", method, worker))?;
    print_result(&value);
    Ok(())
}

/// Have the meta-server relay a call to a worker
pub async fn forward_command(
    client: &RpcClient,
    meta: &EndpointId,
    security: Security,
    worker: &EndpointId,
    method: &str,
    args: &[String],
) -> Result<()> {
    let call = MetaCall::ForwardCommand {
        ip: worker.host.clone(),
        port: worker.port,
        call: parse_call(method, args)?,
    };
    let value = client
        .call(meta, security, &call)
        .await
        .with_context(|| format!("Failed to reach meta-server {}", meta))?;
    print_result(&value);
    Ok(())
}

fn print_result(value: &Value) {
    if value.as_str() == Some(NOT_AUTHENTICATED) {
        print_warning("The worker refused the call; run 'jobmesh keys init' and authorize your key");
        return;
    }
    println!("{}", format_value(value));
}
