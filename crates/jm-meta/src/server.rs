//! Meta-server lifecycle

use std::sync::Arc;

use jm_core::auth::{Credentials, KeyStore, Verifier};
use jm_core::config::MeshConfig;
use jm_core::{rpc, EndpointId, MeshError, RpcClient, WorkerRecord};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::Collector;
use crate::directory::DirectoryHandle;
use crate::registrar::Registrar;
use crate::service::MetaService;
use crate::validation::run_validation;

/// A running meta-server
pub struct MetaServer {
    port: u16,
    directory: DirectoryHandle,
    service: Arc<MetaService>,
    shutdown: CancellationToken,
    serve_task: JoinHandle<std::io::Result<()>>,
    validation_task: JoinHandle<()>,
}

impl MetaServer {
    /// Bind `meta.bind_address:meta.port` and start the validation loop
    ///
    /// With `collect`, the configured subnets are scanned once in the
    /// background.
    pub async fn start(config: MeshConfig, collect: bool) -> Result<Self, MeshError> {
        let tls = if config.meta.tls {
            rpc::load_tls(&config.network).await
        } else {
            None
        };

        let addr = format!("{}:{}", config.meta.bind_address, config.meta.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        let store = KeyStore::new(&config.auth.key_dir);
        let credentials = match Credentials::local(&store) {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                tracing::warn!("No credentials, sensitive metadata will be missing: {}", e);
                None
            }
        };
        let verifier = match Verifier::new(store, config.auth.max_challenge_age) {
            Ok(verifier) => Some(Arc::new(verifier)),
            Err(e) => {
                tracing::warn!("Authentication unavailable, kill refused: {}", e);
                None
            }
        };

        let client = RpcClient::new(&config.network, credentials)?;
        let forward_client = RpcClient::new(&config.network, None)?;

        let shutdown = CancellationToken::new();
        let (directory, _actor) = DirectoryHandle::spawn();
        let registrar = Registrar::new(directory.clone(), client.clone());
        let collector = Arc::new(Collector::new(
            registrar.clone(),
            client.clone(),
            config.network.clone(),
            config.meta.scan_concurrency,
        ));

        let validation_task = tokio::spawn(run_validation(
            directory.clone(),
            client,
            config.meta.validation_interval,
            config.meta.validation_concurrency,
            shutdown.clone(),
        ));

        let service = Arc::new(MetaService::new(
            config,
            directory.clone(),
            registrar,
            collector,
            forward_client,
            shutdown.clone(),
        ));
        let router = rpc::router(Arc::clone(&service), verifier);
        let serve_task = tokio::spawn(rpc::serve(listener, router, tls, shutdown.clone()));
        tracing::info!("Meta-server listening on {}", addr);

        if collect {
            service.spawn_scan(None);
        }

        Ok(Self {
            port,
            directory,
            service,
            shutdown,
            serve_task,
            validation_task,
        })
    }

    /// Bound port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Loopback endpoint of this server
    pub fn local_endpoint(&self) -> EndpointId {
        EndpointId::new("127.0.0.1", self.port)
    }

    /// Handle to the directory
    pub fn directory(&self) -> &DirectoryHandle {
        &self.directory
    }

    /// Current directory entries
    pub async fn workers(&self) -> Vec<WorkerRecord> {
        self.directory.snapshot().await
    }

    /// Start a background scan of the configured subnets plus `additional`
    pub fn scan(&self, additional: Option<&str>) {
        self.service.spawn_scan(additional);
    }

    /// Token cancelled by `kill` or [`shutdown`](Self::shutdown)
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop validation and scans, drain in-flight calls and close the socket
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.validation_task.await {
            tracing::warn!("Validation task failed: {}", e);
        }
        match self.serve_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Meta-server ended with error: {}", e),
            Err(e) => tracing::warn!("Meta-server task failed: {}", e),
        }
        tracing::info!("Meta-server on port {} closed", self.port);
    }
}
