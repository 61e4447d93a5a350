//! Client side of the RPC transport
//!
//! One [`RpcClient`] talks to any number of endpoints. Each call is a single
//! HTTP POST bounded by the configured connect and call timeouts, optionally
//! over TLS, carrying a fresh authentication challenge.

use std::error::Error as StdError;
use std::time::Duration;

use dashmap::DashMap;
use jm_protocol::{RpcReply, RPC_PATH};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::auth::Credentials;
use crate::config::NetworkConfig;
use crate::error::CallError;
use crate::types::EndpointId;

/// Channel security for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS only
    Tls,
    /// Plaintext only
    Plain,
    /// TLS first, plaintext if the TLS attempt fails
    Auto,
}

impl Security {
    /// Fixed security matching a recorded `ssl` flag
    pub fn from_ssl(ssl: bool) -> Self {
        if ssl {
            Security::Tls
        } else {
            Security::Plain
        }
    }
}

/// Authenticated RPC client
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    credentials: Option<Credentials>,
    /// Transport that last worked per endpoint, consulted by `Auto`
    known_ssl: std::sync::Arc<DashMap<EndpointId, bool>>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("credentials", &self.credentials)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Create a client from the network settings
    pub fn new(network: &NetworkConfig, credentials: Option<Credentials>) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(network.allow_self_signed)
            .connect_timeout(network.connect_timeout)
            .timeout(network.call_timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| CallError::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            credentials,
            known_ssl: Default::default(),
            connect_timeout: network.connect_timeout,
        })
    }

    /// Connect timeout this client was built with
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Call one method and return its raw result
    pub async fn call<C>(
        &self,
        endpoint: &EndpointId,
        security: Security,
        call: &C,
    ) -> Result<Value, CallError>
    where
        C: Serialize + ?Sized,
    {
        match security {
            Security::Tls => self.post(endpoint, true, call).await,
            Security::Plain => self.post(endpoint, false, call).await,
            Security::Auto => self.call_auto(endpoint, call).await.map(|(value, _)| value),
        }
    }

    /// Call with TLS first, then plaintext, reporting which one answered
    pub async fn call_auto<C>(
        &self,
        endpoint: &EndpointId,
        call: &C,
    ) -> Result<(Value, bool), CallError>
    where
        C: Serialize + ?Sized,
    {
        if let Some(ssl) = self.known_ssl.get(endpoint).map(|entry| *entry) {
            match self.post(endpoint, ssl, call).await {
                Err(e) if e.is_transport() => {
                    self.known_ssl.remove(endpoint);
                }
                result => return result.map(|value| (value, ssl)),
            }
        }

        let tls_error = match self.post(endpoint, true, call).await {
            Ok(value) => {
                self.known_ssl.insert(endpoint.clone(), true);
                return Ok((value, true));
            }
            Err(e @ (CallError::Refused(_) | CallError::Timeout(_) | CallError::Unreachable(_))) => {
                return Err(e)
            }
            Err(CallError::Fault(fault)) => return Err(CallError::Fault(fault)),
            Err(e) => e,
        };
        tracing::debug!("TLS call to {} failed ({}), trying plaintext", endpoint, tls_error);

        let value = self.post(endpoint, false, call).await?;
        self.known_ssl.insert(endpoint.clone(), false);
        Ok((value, false))
    }

    /// Call one method and decode its result
    pub async fn call_as<T, C>(
        &self,
        endpoint: &EndpointId,
        security: Security,
        call: &C,
    ) -> Result<T, CallError>
    where
        T: DeserializeOwned,
        C: Serialize + ?Sized,
    {
        let value = self.call(endpoint, security, call).await?;
        serde_json::from_value(value).map_err(|e| CallError::Decode(e.to_string()))
    }

    async fn post<C>(&self, endpoint: &EndpointId, tls: bool, call: &C) -> Result<Value, CallError>
    where
        C: Serialize + ?Sized,
    {
        let scheme = if tls { "https" } else { "http" };
        let url = format!("{}://{}:{}{}", scheme, endpoint.host, endpoint.port, RPC_PATH);

        let mut request = self.http.post(&url).json(call);
        if let Some(credentials) = &self.credentials {
            match credentials.authorization_header() {
                Ok(header) => request = request.header(reqwest::header::AUTHORIZATION, header),
                Err(e) => tracing::warn!("Sending call without credentials: {}", e),
            }
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Http(format!("{} answered {}", url, status)));
        }

        let body = response.bytes().await.map_err(classify)?;
        let reply: RpcReply =
            serde_json::from_slice(&body).map_err(|e| CallError::Decode(e.to_string()))?;

        tracing::trace!("Call to {} answered", url);
        reply.into_result().map_err(CallError::Fault)
    }
}

/// Map a transport failure onto the call error taxonomy
fn classify(err: reqwest::Error) -> CallError {
    let text = err.to_string();
    if err.is_timeout() {
        return CallError::Timeout(text);
    }
    if err.is_decode() {
        return CallError::Decode(text);
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if cause.downcast_ref::<rustls::Error>().is_some() {
            return CallError::Tls(cause.to_string());
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if let Some(inner) = io.get_ref() {
                if inner.downcast_ref::<rustls::Error>().is_some() {
                    return CallError::Tls(inner.to_string());
                }
            }
            if let Some(mapped) = classify_io(io) {
                return mapped;
            }
        }
        source = cause.source();
    }

    CallError::Http(text)
}

/// Map an I/O error onto the call error taxonomy, if it is a connect-level one
pub fn classify_io(err: &std::io::Error) -> Option<CallError> {
    use std::io::ErrorKind;

    let text = err.to_string();
    match err.kind() {
        ErrorKind::ConnectionRefused => return Some(CallError::Refused(text)),
        ErrorKind::TimedOut | ErrorKind::WouldBlock => return Some(CallError::Timeout(text)),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            return Some(CallError::Unreachable(text))
        }
        _ => {}
    }

    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        if code == libc::EHOSTUNREACH || code == libc::ENETUNREACH || code == libc::EHOSTDOWN {
            return Some(CallError::Unreachable(text));
        }
    }

    None
}
