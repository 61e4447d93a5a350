//! Server side of the RPC transport
//!
//! A service implements [`RpcService`] for its call enum. [`router`] wraps it
//! in an axum router that decodes calls, checks credentials and gates
//! sensitive methods; [`serve`] runs the router on a bound listener over
//! plaintext or TLS until the shutdown token fires.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap};
use axum::routing::post;
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use jm_protocol::{decode_call, RpcMethod, RpcReply, RPC_PATH};
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::auth::Verifier;
use crate::config::NetworkConfig;

/// How long in-flight TLS calls may run after shutdown was requested
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What the server knows about the caller of one request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// The request carried a valid challenge
    pub authenticated: bool,
    /// User named in the credentials, when they verified
    pub user: Option<String>,
    /// Remote address, when known
    pub peer: Option<SocketAddr>,
}

/// A closed set of calls answered by one endpoint
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    /// Call enum of this service
    type Call: RpcMethod + DeserializeOwned + Send;

    /// Answer one decoded (and, if sensitive, authenticated) call
    async fn handle(&self, call: Self::Call, ctx: &RequestContext) -> RpcReply;
}

struct ServerState<S> {
    service: Arc<S>,
    verifier: Option<Arc<Verifier>>,
}

impl<S> Clone for ServerState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            verifier: self.verifier.clone(),
        }
    }
}

/// Build the HTTP router for a service
///
/// Without a verifier every request is unauthenticated.
pub fn router<S: RpcService>(service: Arc<S>, verifier: Option<Arc<Verifier>>) -> Router {
    Router::new()
        .route(RPC_PATH, post(handle_rpc::<S>))
        .with_state(ServerState { service, verifier })
}

async fn handle_rpc<S: RpcService>(
    State(state): State<ServerState<S>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<RpcReply> {
    let mut ctx = RequestContext {
        peer: peer.map(|ConnectInfo(addr)| addr),
        ..Default::default()
    };

    if let (Some(verifier), Some(value)) = (&state.verifier, headers.get(header::AUTHORIZATION)) {
        match value.to_str().map(|v| verifier.verify_header(v)) {
            Ok(Ok(user)) => {
                ctx.authenticated = true;
                ctx.user = Some(user);
            }
            Ok(Err(e)) => tracing::debug!("Credentials from {:?} rejected: {}", ctx.peer, e),
            Err(_) => tracing::debug!("Non-ASCII credentials from {:?}", ctx.peer),
        }
    }

    let call: S::Call = match decode_call(&body) {
        Ok(call) => call,
        Err(e) => {
            tracing::debug!("Undecodable call from {:?}: {}", ctx.peer, e);
            return Json(RpcReply::Fault(e.into()));
        }
    };

    if call.requires_auth() && !ctx.authenticated {
        tracing::debug!("Refusing {} to unauthenticated caller {:?}", call.name(), ctx.peer);
        return Json(RpcReply::not_authenticated());
    }

    tracing::trace!("Handling {} for {:?}", call.name(), ctx.peer);
    Json(state.service.handle(call, &ctx).await)
}

/// Make `ring` the process-wide rustls provider
///
/// Safe to call repeatedly; only the first call installs.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Load the server certificate, or `None` to serve plaintext
pub async fn load_tls(network: &NetworkConfig) -> Option<RustlsConfig> {
    if !network.has_tls_material() {
        warn_missing_tls(&network.certificate_path, &network.tls_key_path);
        return None;
    }

    install_crypto_provider();
    match RustlsConfig::from_pem_file(&network.certificate_path, &network.tls_key_path).await {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(
                "Failed to load TLS material from {:?}: {}. Serving plaintext.",
                network.certificate_path,
                e
            );
            None
        }
    }
}

fn warn_missing_tls(cert: &Path, key: &Path) {
    tracing::warn!(
        "No TLS certificate at {:?} / {:?}. Serving plaintext. Create one with:\n  \
         openssl genrsa -out {} 2048\n  \
         openssl req -new -x509 -key {} -out {} -days 1095",
        cert,
        key,
        key.display(),
        key.display(),
        cert.display()
    );
}

/// Serve `router` on `listener` until `shutdown` fires
///
/// In-flight calls are drained before this returns.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    tls: Option<RustlsConfig>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let service = router.into_make_service_with_connect_info::<SocketAddr>();

    match tls {
        None => {
            axum::serve(listener, service)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }
        Some(config) => {
            let handle = axum_server::Handle::new();
            let stopper = handle.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                stopper.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
            });

            axum_server::from_tcp_rustls(listener.into_std()?, config)
                .handle(handle)
                .serve(service)
                .await
        }
    }
}
