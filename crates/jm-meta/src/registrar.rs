//! Registration of workers into the directory
//!
//! Admission is asked of the directory first; only the caller that owns
//! the pending slot fetches the worker's metadata, then hands the record
//! back to the directory.

use jm_core::{CallError, EndpointId, ProcessId, RpcClient, Security, WorkerMetadata, WorkerRecord};
use jm_protocol::WorkerCall;
use serde::de::DeserializeOwned;

use crate::directory::{Admission, DirectoryHandle};

/// Admits registrations and fetches worker metadata
#[derive(Clone)]
pub struct Registrar {
    directory: DirectoryHandle,
    client: RpcClient,
}

impl Registrar {
    /// `client` should carry credentials: some metadata calls are sensitive
    pub fn new(directory: DirectoryHandle, client: RpcClient) -> Self {
        Self { directory, client }
    }

    /// Register the worker at `ip:port` running as `pid`
    pub async fn register(&self, ip: &str, pid: u32, port: u16) -> Admission {
        let endpoint = EndpointId::new(ip, port);
        tracing::info!("Registering {} with pid {}", endpoint, pid);

        let admission = self.directory.admit(endpoint.clone(), pid).await;
        if !admission.needs_fetch() {
            return admission;
        }

        match fetch_record(&self.client, &endpoint, pid).await {
            Ok(record) => {
                if !self.directory.complete(record).await {
                    tracing::debug!("Registration of {} was superseded", endpoint);
                }
            }
            Err(e) => {
                tracing::warn!("Registering server {} failed: {}", endpoint, e);
                self.directory.abort(endpoint, pid).await;
            }
        }
        admission
    }
}

/// Ask a worker for the metadata kept in its directory entry
pub async fn fetch_record(
    client: &RpcClient,
    endpoint: &EndpointId,
    pid: u32,
) -> Result<WorkerRecord, CallError> {
    let (command_line, ssl) = client.call_auto(endpoint, &WorkerCall::CommandLine).await?;
    let command_line = decode(command_line)?;
    let security = Security::from_ssl(ssl);

    let (cwd, hostname, user, job_name, is_parallel, framework_version, mesh_version, mpi) =
        tokio::try_join!(
            ask::<String>(client, endpoint, security, WorkerCall::Cwd),
            ask::<String>(client, endpoint, security, WorkerCall::Hostname),
            ask::<String>(client, endpoint, security, WorkerCall::User),
            ask::<String>(client, endpoint, security, WorkerCall::JobName),
            ask::<bool>(client, endpoint, security, WorkerCall::IsParallel),
            ask::<String>(client, endpoint, security, WorkerCall::FrameworkVersion),
            ask::<String>(client, endpoint, security, WorkerCall::MeshVersion),
            ask::<Option<String>>(client, endpoint, security, WorkerCall::Mpi),
        )?;

    Ok(WorkerRecord {
        endpoint: endpoint.clone(),
        process: ProcessId::new(endpoint.host.clone(), pid),
        ssl,
        metadata: WorkerMetadata {
            command_line,
            cwd,
            hostname,
            user,
            job_name,
            is_parallel,
            framework_version,
            mesh_version,
            mpi,
        },
    })
}

async fn ask<T: DeserializeOwned>(
    client: &RpcClient,
    endpoint: &EndpointId,
    security: Security,
    call: WorkerCall,
) -> Result<T, CallError> {
    client.call_as(endpoint, security, &call).await
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, CallError> {
    serde_json::from_value(value).map_err(|e| CallError::Decode(e.to_string()))
}
