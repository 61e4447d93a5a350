//! Liveness probe over a port range
//!
//! Scans `[port_start, port_start + port_count)` on one host. A refused
//! connection means "nothing here, try the next port"; a connect timeout or
//! an unreachable host/network means the whole host is gone and the scan
//! stops at once, so a dead host costs at most one connect timeout.

use jm_protocol::WorkerCall;
use serde_json::Value;
use tokio::net::TcpStream;

use crate::error::CallError;
use crate::transport::{classify_io, RpcClient, Security};
use crate::types::EndpointId;

/// Ports on `host` that answer `isWorker`, or `None` when the host is unreachable
pub async fn probe(
    client: &RpcClient,
    host: &str,
    port_start: u16,
    port_count: u16,
) -> Option<Vec<u16>> {
    let mut found = Vec::new();
    let port_end = port_start.saturating_add(port_count);

    for port in port_start..port_end {
        let connect = tokio::time::timeout(client.connect_timeout(), TcpStream::connect((host, port)));
        match connect.await {
            Err(_) => {
                tracing::debug!("Connect to {}:{} timed out, giving up on host", host, port);
                return None;
            }
            Ok(Err(e)) => match classify_io(&e) {
                Some(CallError::Refused(_)) => continue,
                _ => {
                    tracing::debug!("Host {} unreachable at port {}: {}", host, port, e);
                    return None;
                }
            },
            Ok(Ok(stream)) => drop(stream),
        }

        let endpoint = EndpointId::new(host, port);
        match client.call(&endpoint, Security::Auto, &WorkerCall::IsWorker).await {
            Ok(Value::Bool(true)) => found.push(port),
            Ok(other) => tracing::debug!("{} answered isWorker with {}", endpoint, other),
            Err(e) => tracing::debug!("{} is not a worker: {}", endpoint, e),
        }
    }

    Some(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::rpc::{router, serve, RequestContext, RpcService};
    use async_trait::async_trait;
    use jm_protocol::{Fault, RpcReply};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::net::{TcpListener, TcpSocket};
    use tokio_util::sync::CancellationToken;

    struct FakeWorker;

    #[async_trait]
    impl RpcService for FakeWorker {
        type Call = WorkerCall;

        async fn handle(&self, call: WorkerCall, _ctx: &RequestContext) -> RpcReply {
            match call {
                WorkerCall::IsWorker => RpcReply::ok(true),
                _ => RpcReply::fault(Fault::APPLICATION_ERROR, "unsupported"),
            }
        }
    }

    fn client() -> RpcClient {
        let network = NetworkConfig {
            connect_timeout: Duration::from_millis(300),
            call_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        RpcClient::new(&network, None).unwrap()
    }

    /// Three consecutive free ports, the first two bound
    async fn listeners() -> (TcpListener, std::net::TcpListener, u16) {
        loop {
            let worker = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = worker.local_addr().unwrap().port();
            if port > u16::MAX - 3 {
                continue;
            }
            let Ok(silent) = std::net::TcpListener::bind(("127.0.0.1", port + 1)) else {
                continue;
            };
            if std::net::TcpListener::bind(("127.0.0.1", port + 2)).is_err() {
                continue;
            }
            return (worker, silent, port);
        }
    }

    #[tokio::test]
    async fn test_probe_finds_worker_only() {
        let (worker, _silent, port) = listeners().await;
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(
            worker,
            router(Arc::new(FakeWorker), None),
            None,
            shutdown.clone(),
        ));

        // port: worker, port + 1: accepts but never answers, port + 2: closed
        let found = probe(&client(), "127.0.0.1", port, 3).await;
        assert_eq!(found, Some(vec![port]));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_probe_closed_range_is_empty() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert_eq!(probe(&client(), "127.0.0.1", port, 1).await, Some(vec![]));
    }

    /// Listener that never accepts, with its backlog full so new connects hang
    async fn saturated_listener() -> (TcpListener, Vec<TcpStream>, u16) {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(0).unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut held = Vec::new();
        for _ in 0..8 {
            let connect = TcpStream::connect(("127.0.0.1", port));
            match tokio::time::timeout(Duration::from_millis(200), connect).await {
                Ok(Ok(stream)) => held.push(stream),
                _ => break,
            }
        }
        (listener, held, port)
    }

    #[tokio::test]
    async fn test_connect_timeout_short_circuits() {
        let (_listener, _held, port) = saturated_listener().await;
        let client = client();
        let started = Instant::now();

        let found = probe(&client, "127.0.0.1", port, 50).await;

        assert_eq!(found, None);
        assert!(started.elapsed() >= client.connect_timeout());
        assert!(started.elapsed() < client.connect_timeout() * 3);
    }
}
