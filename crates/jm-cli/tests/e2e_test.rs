//! End-to-end tests
//!
//! Runs a worker server in-process and drives it with the jobmesh binary.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;

use jm_core::MeshConfig;
use jm_worker::job::Detached;
use jm_worker::{JobDescription, OutputLog, WorkerServer};

/// Base port for test workers - each test gets its own block
static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

struct TestWorker {
    #[allow(dead_code)] // Keeps temp dir alive
    dir: tempfile::TempDir,
    config_path: std::path::PathBuf,
    server: WorkerServer,
}

impl TestWorker {
    async fn start() -> Self {
        let block = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let mut config = MeshConfig::default();
        config.network.start_port = 45000 + block * 20;
        config.network.start_port_tls = 45000 + block * 20 + 10;
        config.network.port_count = 10;
        config.network.tls_by_default = false;
        config.network.bind_retries = 0;
        config.network.connect_timeout = Duration::from_millis(500);
        config.worker.bind_address = "127.0.0.1".to_string();
        config.worker.advertise_address = Some("127.0.0.1".to_string());
        config.worker.register = false;
        config.discovery.enabled = false;
        config.auth.key_dir = dir.path().join("auth");

        let config_path = dir.path().join("config.toml");
        jm_core::config::save_config(&config_path, &config).expect("Failed to write config");

        let job = JobDescription::from_command(
            vec!["jm-worker".to_string()],
            vec!["solver".to_string()],
            dir.path(),
        );
        let log = Arc::new(OutputLog::new(10, config.liveness.clone()));
        log.insert("Time = 0.25");
        log.insert("deltaT = 0.001");
        let server = WorkerServer::start(config, job, Arc::new(Detached), log)
            .await
            .expect("Failed to start worker server");

        Self {
            dir,
            config_path,
            server,
        }
    }

    fn endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.server.port())
    }
}

/// Run the CLI off the runtime so the in-process worker keeps serving
async fn run(args: Vec<String>) -> assert_cmd::assert::Assert {
    tokio::task::spawn_blocking(move || {
        Command::cargo_bin("jobmesh")
            .expect("Failed to locate jobmesh binary")
            .args(args)
            .assert()
    })
    .await
    .expect("CLI task panicked")
}

fn args(worker: &TestWorker, rest: &[&str]) -> Vec<String> {
    let mut args: Vec<String> = rest.iter().map(|s| s.to_string()).collect();
    args.push("--config".to_string());
    args.push(worker.config_path.display().to_string());
    args
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_public_method() {
    let worker = TestWorker::start().await;

    run(args(&worker, &["call", &worker.endpoint(), "time"]))
        .await
        .success()
        .stdout(predicate::str::contains("0.25"));

    run(args(&worker, &["call", &worker.endpoint(), "isWorker"]))
        .await
        .success()
        .stdout(predicate::str::contains("true"));

    worker.server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sensitive_call_needs_key() {
    let worker = TestWorker::start().await;

    run(args(&worker, &["call", &worker.endpoint(), "lastLine", "--anonymous"]))
        .await
        .success()
        .stderr(predicate::str::contains("refused"));

    run(args(&worker, &["call", &worker.endpoint(), "lastLine"]))
        .await
        .success()
        .stdout(predicate::str::contains("deltaT = 0.001"));

    worker.server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_finds_worker() {
    let worker = TestWorker::start().await;

    run(args(&worker, &["probe", "127.0.0.1"]))
        .await
        .success()
        .stdout(predicate::str::contains(worker.endpoint()));

    worker.server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_methods_from_worker() {
    let worker = TestWorker::start().await;

    run(args(&worker, &["methods", &worker.endpoint()]))
        .await
        .success()
        .stdout(predicate::str::contains("killServer"));

    worker.server.shutdown().await;
}
