//! Meta-server integration tests
//!
//! Runs a meta-server and real (or scripted) worker servers on loopback.

use std::future::Future;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

use jm_core::auth::{Credentials, KeyStore};
use jm_core::rpc::{self, RequestContext, RpcService};
use jm_core::{EndpointId, MeshConfig, RpcClient, Security, WorkerRecord};
use jm_meta::MetaServer;
use jm_protocol::{MetaCall, RpcReply, WorkerCall, NOT_AUTHENTICATED};
use jm_worker::job::Detached;
use jm_worker::{JobDescription, OutputLog, WorkerServer, WorkerState};

/// Base port for test workers - each test gets its own block
static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

fn test_config(keys: &TempDir) -> MeshConfig {
    let block = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);

    let mut config = MeshConfig::default();
    config.network.start_port = 43000 + block * 50;
    config.network.start_port_tls = 43000 + block * 50 + 20;
    config.network.port_count = 20;
    config.network.tls_by_default = false;
    config.network.bind_retries = 0;
    config.network.connect_timeout = Duration::from_millis(500);
    config.network.call_timeout = Duration::from_secs(2);
    config.meta.address = "127.0.0.1".to_string();
    config.meta.bind_address = "127.0.0.1".to_string();
    config.meta.port = 0;
    config.meta.validation_interval = Duration::from_secs(3600);
    config.worker.bind_address = "127.0.0.1".to_string();
    config.worker.advertise_address = Some("127.0.0.1".to_string());
    config.worker.registration_delay = Duration::from_millis(50);
    config.worker.register = false;
    config.discovery.enabled = false;
    config.auth.key_dir = keys.path().to_path_buf();
    config
}

async fn start_worker(config: &MeshConfig) -> WorkerServer {
    let job = JobDescription::from_command(
        ["jm-worker", "--", "solver", "-case", "cavity"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        vec!["solver".to_string(), "-case".to_string(), "cavity".to_string()],
        &std::env::temp_dir(),
    );
    let log = Arc::new(OutputLog::new(10, config.liveness.clone()));
    WorkerServer::start(config.clone(), job, Arc::new(Detached), log)
        .await
        .expect("Failed to start worker server")
}

fn client(config: &MeshConfig) -> RpcClient {
    RpcClient::new(&config.network, None).unwrap()
}

async fn meta_call(config: &MeshConfig, meta: &MetaServer, call: MetaCall) -> Value {
    client(config)
        .call(&meta.local_endpoint(), Security::Plain, &call)
        .await
        .unwrap()
}

fn register(server: &WorkerServer, pid: u32) -> MetaCall {
    MetaCall::RegisterServer {
        ip: "127.0.0.1".to_string(),
        pid,
        port: server.port(),
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_register_fetches_metadata() {
    let keys = tempfile::tempdir().unwrap();
    let config = test_config(&keys);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();
    let worker = start_worker(&config).await;

    let registered = meta_call(&config, &meta, register(&worker, std::process::id())).await;
    assert_eq!(registered, json!(true));

    let list = meta_call(&config, &meta, MetaCall::List).await;
    let key = format!("127.0.0.1:{}", worker.port());
    let record: WorkerRecord = serde_json::from_value(list[&key].clone()).unwrap();
    assert_eq!(record.process.pid, std::process::id());
    assert!(!record.ssl);
    assert_eq!(record.metadata.command_line, "jm-worker -- solver -case cavity");
    assert_eq!(record.metadata.hostname, jm_core::host::hostname());
    assert_eq!(record.metadata.mesh_version, jm_core::MESH_VERSION);

    // Sensitive metadata needs the meta-server's credentials
    assert_ne!(record.metadata.cwd, NOT_AUTHENTICATED);

    worker.shutdown().await;
    meta.shutdown().await;
}

#[tokio::test]
async fn test_worker_registers_itself_and_deregisters_on_shutdown() {
    let keys = tempfile::tempdir().unwrap();
    let mut config = test_config(&keys);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();

    config.meta.port = meta.port();
    config.worker.register = true;
    let worker = start_worker(&config).await;
    let port = worker.port();

    let mut states = worker.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == WorkerState::Serving),
    )
    .await
    .expect("worker never reached Serving")
    .unwrap();

    eventually(|| async { meta.workers().await.len() == 1 }).await;
    assert_eq!(meta.workers().await[0].endpoint.port, port);

    worker.shutdown().await;
    assert!(meta.workers().await.is_empty());
    meta.shutdown().await;
}

#[tokio::test]
async fn test_registration_with_new_pid_replaces_entry() {
    let keys = tempfile::tempdir().unwrap();
    let config = test_config(&keys);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();
    let worker = start_worker(&config).await;

    meta_call(&config, &meta, register(&worker, 1111)).await;
    meta_call(&config, &meta, register(&worker, 1111)).await;
    meta_call(&config, &meta, register(&worker, 2222)).await;

    let workers = meta.workers().await;
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].process.pid, 2222);

    worker.shutdown().await;
    meta.shutdown().await;
}

#[tokio::test]
async fn test_deregister_removes_entry() {
    let keys = tempfile::tempdir().unwrap();
    let config = test_config(&keys);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();
    let worker = start_worker(&config).await;

    meta_call(&config, &meta, register(&worker, std::process::id())).await;
    assert_eq!(meta.workers().await.len(), 1);

    let call = MetaCall::DeregisterServer {
        ip: "127.0.0.1".to_string(),
        pid: std::process::id(),
        port: worker.port(),
    };
    assert_eq!(meta_call(&config, &meta, call).await, json!(true));
    assert!(meta.workers().await.is_empty());

    worker.shutdown().await;
    meta.shutdown().await;
}

/// Worker that answers metadata calls slowly and counts them
struct SlowWorker {
    command_line_calls: AtomicUsize,
}

#[async_trait]
impl RpcService for SlowWorker {
    type Call = WorkerCall;

    async fn handle(&self, call: WorkerCall, _ctx: &RequestContext) -> RpcReply {
        match call {
            WorkerCall::CommandLine => {
                self.command_line_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(300)).await;
                RpcReply::ok("slow")
            }
            WorkerCall::IsParallel => RpcReply::ok(false),
            WorkerCall::Mpi => RpcReply::ok(Value::Null),
            WorkerCall::Pid => RpcReply::ok(4242),
            _ => RpcReply::ok("x"),
        }
    }
}

#[tokio::test]
async fn test_concurrent_duplicate_registration_fetches_once() {
    let keys = tempfile::tempdir().unwrap();
    let config = test_config(&keys);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let worker = Arc::new(SlowWorker {
        command_line_calls: AtomicUsize::new(0),
    });
    let stop = CancellationToken::new();
    let serving = tokio::spawn(rpc::serve(
        listener,
        rpc::router(Arc::clone(&worker), None),
        None,
        stop.clone(),
    ));

    let call = MetaCall::RegisterServer {
        ip: "127.0.0.1".to_string(),
        pid: 4242,
        port,
    };
    let (first, second) = tokio::join!(
        meta_call(&config, &meta, call.clone()),
        meta_call(&config, &meta, call.clone()),
    );
    assert_eq!(first, json!(true));
    assert_eq!(second, json!(true));

    eventually(|| async { meta.workers().await.len() == 1 }).await;
    assert_eq!(worker.command_line_calls.load(Ordering::SeqCst), 1);

    stop.cancel();
    serving.await.unwrap().unwrap();
    meta.shutdown().await;
}

#[tokio::test]
async fn test_validation_removes_dead_and_mismatched_entries() {
    let keys = tempfile::tempdir().unwrap();
    let mut config = test_config(&keys);
    config.meta.validation_interval = Duration::from_millis(300);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();

    let alive = start_worker(&config).await;
    let mismatched = start_worker(&config).await;
    let dead = start_worker(&config).await;

    meta_call(&config, &meta, register(&alive, std::process::id())).await;
    meta_call(&config, &meta, register(&mismatched, 1)).await;
    meta_call(&config, &meta, register(&dead, std::process::id())).await;
    assert_eq!(meta.workers().await.len(), 3);

    dead.shutdown().await;

    eventually(|| async { meta.workers().await.len() == 1 }).await;
    assert_eq!(meta.workers().await[0].endpoint.port, alive.port());

    alive.shutdown().await;
    mismatched.shutdown().await;
    meta.shutdown().await;
}

#[tokio::test]
async fn test_forward_isolates_failures() {
    let keys = tempfile::tempdir().unwrap();
    let config = test_config(&keys);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();
    let first = start_worker(&config).await;
    let second = start_worker(&config).await;

    let forward = |port: u16, call: WorkerCall| MetaCall::ForwardCommand {
        ip: "127.0.0.1".to_string(),
        port,
        call,
    };

    let pid = meta_call(&config, &meta, forward(first.port(), WorkerCall::Pid)).await;
    assert_eq!(pid, json!(std::process::id()));

    let closed_port = second.port();
    second.shutdown().await;
    let failed = meta_call(&config, &meta, forward(closed_port, WorkerCall::Pid)).await;
    assert!(
        failed.as_str().unwrap().starts_with("socket.error: "),
        "got {}",
        failed
    );

    let refused = meta_call(&config, &meta, forward(first.port(), WorkerCall::Cwd)).await;
    assert_eq!(refused, json!(NOT_AUTHENTICATED));

    let pid = meta_call(&config, &meta, forward(first.port(), WorkerCall::Pid)).await;
    assert_eq!(pid, json!(std::process::id()));

    first.shutdown().await;
    meta.shutdown().await;
}

#[tokio::test]
async fn test_scan_finds_loopback_worker() {
    let keys = tempfile::tempdir().unwrap();
    let config = test_config(&keys);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();
    let worker = start_worker(&config).await;

    let call = MetaCall::Scan {
        subnets: Some("127.0.0.1/32".to_string()),
    };
    assert_eq!(meta_call(&config, &meta, call).await, json!(true));

    eventually(|| async { meta.workers().await.len() == 1 }).await;
    let record = &meta.workers().await[0];
    assert_eq!(record.endpoint, EndpointId::new("127.0.0.1", worker.port()));
    assert_eq!(record.process.pid, std::process::id());

    worker.shutdown().await;
    meta.shutdown().await;
}

/// Listener that never accepts, with its backlog full so new connects hang
async fn saturated_listener(port: u16) -> (TcpListener, Vec<TcpStream>) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind(([127, 0, 0, 1], port).into()).unwrap();
    let listener = socket.listen(0).unwrap();

    let mut held = Vec::new();
    for _ in 0..8 {
        let connect = TcpStream::connect(("127.0.0.1", port));
        match tokio::time::timeout(Duration::from_millis(200), connect).await {
            Ok(Ok(stream)) => held.push(stream),
            _ => break,
        }
    }
    (listener, held)
}

#[tokio::test]
async fn test_scan_keeps_plain_workers_when_tls_range_times_out() {
    let keys = tempfile::tempdir().unwrap();
    let config = test_config(&keys);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();
    let worker = start_worker(&config).await;
    assert!(!worker.ssl());
    let _blocked = saturated_listener(config.network.start_port_tls).await;

    let call = MetaCall::Scan {
        subnets: Some("127.0.0.1/32".to_string()),
    };
    assert_eq!(meta_call(&config, &meta, call).await, json!(true));

    eventually(|| async { meta.workers().await.len() == 1 }).await;
    let record = &meta.workers().await[0];
    assert_eq!(record.endpoint, EndpointId::new("127.0.0.1", worker.port()));

    worker.shutdown().await;
    meta.shutdown().await;
}

#[tokio::test]
async fn test_kill_needs_credentials() {
    let keys = tempfile::tempdir().unwrap();
    let config = test_config(&keys);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();
    let stop = meta.shutdown_token();

    let refused = meta_call(&config, &meta, MetaCall::Kill).await;
    assert_eq!(refused, json!(NOT_AUTHENTICATED));
    assert!(!stop.is_cancelled());

    let credentials = Credentials::local(&KeyStore::new(&config.auth.key_dir)).unwrap();
    let authenticated = RpcClient::new(&config.network, Some(credentials)).unwrap();
    let killed = authenticated
        .call(&meta.local_endpoint(), Security::Plain, &MetaCall::Kill)
        .await
        .unwrap();
    assert_eq!(killed, json!(true));
    assert!(stop.is_cancelled());

    meta.shutdown().await;
}

#[tokio::test]
async fn test_is_meta_server_and_methods() {
    let keys = tempfile::tempdir().unwrap();
    let config = test_config(&keys);
    let meta = MetaServer::start(config.clone(), false).await.unwrap();

    assert_eq!(
        meta_call(&config, &meta, MetaCall::IsMetaServer).await,
        json!(true)
    );
    let methods = meta_call(&config, &meta, MetaCall::ListMethods).await;
    let methods: Vec<String> = serde_json::from_value(methods).unwrap();
    assert!(methods.contains(&"forwardCommand".to_string()));
    assert!(methods.contains(&"system.methodHelp".to_string()));

    meta.shutdown().await;
}
