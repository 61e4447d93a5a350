//! Meta-server RPC service

use std::sync::Arc;

use async_trait::async_trait;
use jm_core::config::MeshConfig;
use jm_core::rpc::{RequestContext, RpcService};
use jm_core::{CallError, EndpointId, RpcClient, Security};
use jm_protocol::method::{list_methods, method_help};
use jm_protocol::{MetaCall, RpcReply, WorkerCall, META_METHODS};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::collector::{parse_subnets, Collector};
use crate::directory::DirectoryHandle;
use crate::registrar::Registrar;

/// Answers [`MetaCall`]s against the directory
pub struct MetaService {
    config: MeshConfig,
    directory: DirectoryHandle,
    registrar: Registrar,
    collector: Arc<Collector>,
    forward_client: RpcClient,
    shutdown: CancellationToken,
}

impl MetaService {
    /// `forward_client` relays `forwardCommand`; give it no credentials so
    /// relayed sensitive calls stay refused
    pub fn new(
        config: MeshConfig,
        directory: DirectoryHandle,
        registrar: Registrar,
        collector: Arc<Collector>,
        forward_client: RpcClient,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            directory,
            registrar,
            collector,
            forward_client,
            shutdown,
        }
    }

    /// Scan the configured subnets plus `additional` in the background
    pub fn spawn_scan(&self, additional: Option<&str>) {
        let mut lists: Vec<String> = additional.into_iter().map(str::to_string).collect();
        lists.extend(self.config.meta.search_subnets.iter().cloned());
        let subnets = parse_subnets(&lists);
        if subnets.is_empty() {
            tracing::debug!("No subnets to scan");
            return;
        }

        let collector = Arc::clone(&self.collector);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = collector.collect(&subnets) => {}
                _ = shutdown.cancelled() => tracing::debug!("Scan cancelled"),
            }
        });
    }
}

#[async_trait]
impl RpcService for MetaService {
    type Call = MetaCall;

    async fn handle(&self, call: MetaCall, ctx: &RequestContext) -> RpcReply {
        match call {
            MetaCall::IsMetaServer => RpcReply::ok(true),
            MetaCall::RegisterServer { ip, pid, port } => {
                self.registrar.register(&ip, pid, port).await;
                RpcReply::ok(true)
            }
            MetaCall::DeregisterServer { ip, pid, port } => {
                let endpoint = EndpointId::new(ip, port);
                tracing::info!("Deregistering {} with pid {}", endpoint, pid);
                self.directory.remove(endpoint, None).await;
                RpcReply::ok(true)
            }
            MetaCall::List => RpcReply::ok(self.directory.list().await),
            MetaCall::ForwardCommand { ip, port, call } => {
                let endpoint = EndpointId::new(ip, port);
                RpcReply::ok(forward(&self.forward_client, &endpoint, &call).await)
            }
            MetaCall::Scan { subnets } => {
                self.spawn_scan(subnets.as_deref());
                RpcReply::ok(true)
            }
            MetaCall::Collect => {
                self.spawn_scan(None);
                RpcReply::ok(true)
            }
            MetaCall::Kill => {
                tracing::warn!("Terminating due to request from {:?}", ctx.user);
                self.shutdown.cancel();
                RpcReply::ok(true)
            }
            MetaCall::ListMethods => RpcReply::ok(list_methods(META_METHODS)),
            MetaCall::MethodHelp { method } => RpcReply::ok(method_help(META_METHODS, &method)),
        }
    }
}

/// Relay one call; failures come back as a description, never as a fault
pub async fn forward(client: &RpcClient, endpoint: &EndpointId, call: &WorkerCall) -> Value {
    match client.call(endpoint, Security::Auto, call).await {
        Ok(Value::Null) => Value::String(String::new()),
        Ok(value) => {
            tracing::debug!("Forwarded to {}: {:?}", endpoint, value);
            value
        }
        Err(CallError::Fault(fault)) => Value::String(format!("Fault: {}", fault)),
        Err(e) if e.is_transport() => Value::String(format!("socket.error: {}", e)),
        Err(e) => Value::String(format!("Error: {}", e)),
    }
}
