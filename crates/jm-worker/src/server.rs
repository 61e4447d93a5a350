//! Worker server lifecycle
//!
//! Binding, delayed announcement and registration, and orderly shutdown of
//! the RPC endpoint embedded in a job.

use std::sync::Arc;

use jm_core::auth::{Credentials, KeyStore, Verifier};
use jm_core::config::MeshConfig;
use jm_core::discovery::{Announcement, Announcer, ServiceProperties};
use jm_core::rpc;
use jm_core::time::unix_now;
use jm_core::{host, EndpointId, MeshError, RpcClient, Security};
use jm_protocol::MetaCall;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::ExponentialBackoff;
use crate::job::{JobControl, JobDescription};
use crate::output::OutputLog;
use crate::service::{WorkerIdentity, WorkerService};
use crate::state::WorkerState;

/// A running worker server
pub struct WorkerServer {
    config: MeshConfig,
    identity: WorkerIdentity,
    job_path: String,
    client: RpcClient,
    announcer: Arc<Announcer>,
    state: Arc<watch::Sender<WorkerState>>,
    shutdown: CancellationToken,
    stop_requested: CancellationToken,
    serve_task: JoinHandle<std::io::Result<()>>,
    registration_task: JoinHandle<()>,
}

impl WorkerServer {
    /// Bind, start serving, and schedule announcement and registration
    pub async fn start(
        config: MeshConfig,
        job: JobDescription,
        control: Arc<dyn JobControl>,
        log: Arc<OutputLog>,
    ) -> Result<Self, MeshError> {
        let state = Arc::new(watch::channel(WorkerState::Starting).0);

        let tls = if config.network.tls_by_default {
            rpc::load_tls(&config.network).await
        } else {
            None
        };
        let ssl = tls.is_some();

        let listener = bind_first_free(&config, ssl).await?;
        let port = listener.local_addr()?.port();

        let ip = config
            .worker
            .advertise_address
            .clone()
            .unwrap_or_else(|| host::local_ip().to_string());
        let identity = WorkerIdentity {
            ip,
            port,
            ssl,
            started_at: unix_now(),
            hostname: host::hostname(),
            user: host::user_name(),
        };

        // Credentials first: they create the local key the verifier relies on
        let store = KeyStore::new(&config.auth.key_dir);
        let credentials = local_credentials(&config, &store);
        let verifier = match Verifier::new(store.clone(), config.auth.max_challenge_age) {
            Ok(verifier) => Some(Arc::new(verifier)),
            Err(e) => {
                tracing::warn!("Authentication unavailable, sensitive calls refused: {}", e);
                None
            }
        };
        let client = RpcClient::new(&config.network, credentials)?;

        let shutdown = CancellationToken::new();
        let stop_requested = CancellationToken::new();
        let job_path = job.job_path.to_string_lossy().into_owned();

        let service = Arc::new(WorkerService::new(
            config.clone(),
            job,
            control,
            log,
            identity.clone(),
            stop_requested.clone(),
        ));
        let router = rpc::router(service, verifier);
        let serve_task = tokio::spawn(rpc::serve(listener, router, tls, shutdown.clone()));

        state.send_replace(WorkerState::Listening);
        tracing::info!(
            "Worker server listening on port {} ({})",
            port,
            if ssl { "TLS" } else { "plaintext" }
        );

        let announcer = Arc::new(Announcer::new(config.discovery.clone()));
        let registration_task = tokio::spawn(announce_and_register(
            config.clone(),
            identity.clone(),
            job_path.clone(),
            client.clone(),
            Arc::clone(&announcer),
            Arc::clone(&state),
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            identity,
            job_path,
            client,
            announcer,
            state,
            shutdown,
            stop_requested,
            serve_task,
            registration_task,
        })
    }

    /// Bound port
    pub fn port(&self) -> u16 {
        self.identity.port
    }

    /// Whether the port speaks TLS
    pub fn ssl(&self) -> bool {
        self.identity.ssl
    }

    /// Endpoint as reported to others
    pub fn endpoint(&self) -> EndpointId {
        EndpointId::new(self.identity.ip.clone(), self.identity.port)
    }

    /// Identity reported by the server
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Observe lifecycle changes
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Token cancelled when a caller asks the server to stop (`killServer`)
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_requested.clone()
    }

    /// Deregister, withdraw, drain in-flight calls and close the socket
    pub async fn shutdown(self) {
        self.state.send_replace(WorkerState::Stopping);
        self.registration_task.abort();

        if self.config.worker.register {
            let meta = self.config.meta.endpoint();
            let call = MetaCall::DeregisterServer {
                ip: self.identity.ip.clone(),
                pid: std::process::id(),
                port: self.identity.port,
            };
            match self
                .client
                .call(&meta, Security::from_ssl(self.config.meta.tls), &call)
                .await
            {
                Ok(_) => tracing::info!("Deregistered from meta-server {}", meta),
                Err(e) => tracing::warn!("Failed to deregister from {}: {}", meta, e),
            }
        }

        self.announcer.withdraw().await;

        self.shutdown.cancel();
        match self.serve_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Server for {} ended with error: {}", self.job_path, e),
            Err(e) => tracing::warn!("Server task for {} failed: {}", self.job_path, e),
        }

        self.state.send_replace(WorkerState::Closed);
        tracing::info!("Worker server on port {} closed", self.identity.port);
    }
}

fn local_credentials(config: &MeshConfig, store: &KeyStore) -> Option<Credentials> {
    if !config.auth.send_credentials {
        return None;
    }
    match Credentials::local(store) {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            tracing::warn!("Calling without credentials: {}", e);
            None
        }
    }
}

/// Bind the first free port of the worker range, retrying with backoff
async fn bind_first_free(config: &MeshConfig, tls: bool) -> Result<TcpListener, MeshError> {
    let range = config.network.port_range(tls);
    let mut backoff =
        ExponentialBackoff::from_config(&config.network.backoff, config.network.bind_retries);

    loop {
        for port in range.clone() {
            let addr = format!("{}:{}", config.worker.bind_address, port);
            match TcpListener::bind(&addr).await {
                Ok(listener) => return Ok(listener),
                Err(e) => tracing::trace!("Port {} unavailable: {}", port, e),
            }
        }

        let Some(delay) = backoff.next_delay() else {
            break;
        };
        tracing::warn!(
            "No free port in {}..{}, retrying in {:?} (attempt {})",
            range.start,
            range.end,
            delay,
            backoff.attempts()
        );
        tokio::time::sleep(delay).await;
    }

    Err(MeshError::Io(std::io::Error::new(
        std::io::ErrorKind::AddrInUse,
        format!("no free port in {}..{}", range.start, range.end),
    )))
}

/// After the registration delay, announce and register concurrently
async fn announce_and_register(
    config: MeshConfig,
    identity: WorkerIdentity,
    job_path: String,
    client: RpcClient,
    announcer: Arc<Announcer>,
    state: Arc<watch::Sender<WorkerState>>,
    shutdown: CancellationToken,
) {
    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = tokio::time::sleep(config.worker.registration_delay) => {}
    }

    let announce = async {
        if !config.discovery.enabled {
            return;
        }
        let properties = ServiceProperties {
            host: identity.hostname.clone(),
            ip: identity.ip.clone(),
            id: identity.id(),
            pid: std::process::id(),
            port: identity.port,
            ssl: identity.ssl,
            path: job_path.clone(),
        };
        let announcement = Announcement::new(&host::short_hostname(), properties);
        if let Err(e) = announcer.announce(announcement).await {
            tracing::warn!("Multicast announcement failed: {}", e);
        }
    };

    let register = async {
        if !config.worker.register {
            return;
        }
        let meta = config.meta.endpoint();
        let call = MetaCall::RegisterServer {
            ip: identity.ip.clone(),
            pid: std::process::id(),
            port: identity.port,
        };
        match client
            .call(&meta, Security::from_ssl(config.meta.tls), &call)
            .await
        {
            Ok(_) => tracing::info!("Registered with meta-server {}", meta),
            Err(e) => tracing::warn!("Registration with {} failed: {}", meta, e),
        }
    };

    tokio::join!(announce, register);
    state.send_if_modified(|current| {
        if *current == WorkerState::Listening {
            *current = WorkerState::Serving;
            true
        } else {
            false
        }
    });
}
