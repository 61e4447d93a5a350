//! Method introspection

use anyhow::{Context, Result};
use jm_core::{EndpointId, RpcClient, Security};
use jm_protocol::WorkerCall;
use jm_protocol::WORKER_METHODS;

use crate::output::{format_methods, format_value};

/// Describe worker methods
///
/// Without an endpoint the built-in table is printed. With one, the
/// endpoint itself is asked (`system.listMethods` / `system.methodHelp`).
pub async fn methods_command(
    client: &RpcClient,
    endpoint: Option<&EndpointId>,
    method: Option<&str>,
) -> Result<()> {
    let Some(endpoint) = endpoint else {
        match method {
            Some(method) => println!("{}", jm_protocol::method::method_help(WORKER_METHODS, method)),
            None => println!("{}", format_methods(WORKER_METHODS)),
        }
        return Ok(());
    };

    let call = match method {
        Some(method) => WorkerCall::MethodHelp {
            method: method.to_string(),
        },
        None => WorkerCall::ListMethods,
    };
    let value = client
        .call(endpoint, Security::Auto, &call)
        .await
        .with_context(|| format!("Failed to ask {}", endpoint))?;

    match value.as_array() {
        Some(names) => {
            for name in names {
                println!("{}", format_value(name));
            }
        }
        None => println!("{}", format_value(&value)),
    }
    Ok(())
}
