//! jobmesh worker runner
//!
//! Runs a job as a child process with an embedded worker server. The
//! child's output is echoed and fed into the server's output log; control
//! calls are forwarded to the child as signals.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jm_core::MeshConfig;
use jm_worker::job::Detached;
use jm_worker::{JobAction, JobControl, JobDescription, OutputLog, WorkerServer};

/// How long to wait for the last output after the job exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "jm-worker")]
#[command(about = "Run a job with an embedded jobmesh worker server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of output lines the server keeps
    #[arg(long)]
    lines: Option<usize>,

    /// Do not register with the meta-server
    #[arg(long)]
    no_register: bool,

    /// Do not announce via multicast
    #[arg(long)]
    no_announce: bool,

    /// Simulated start time reported by `startTime`
    #[arg(long)]
    start_time: Option<f64>,

    /// Simulated end time reported by `endTime`
    #[arg(long)]
    end_time: Option<f64>,

    /// Run with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Command to run, after `--`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

/// Job control through POSIX signals
struct SignalControl {
    pid: u32,
}

impl JobControl for SignalControl {
    #[cfg(unix)]
    fn control(&self, action: JobAction) -> bool {
        let signal = match action {
            JobAction::Stop => libc::SIGTERM,
            JobAction::Write => libc::SIGUSR1,
            JobAction::StopAtNextWrite => libc::SIGUSR2,
            JobAction::Kill => libc::SIGKILL,
        };
        // SAFETY: kill(2) has no memory-safety preconditions
        let result = unsafe { libc::kill(self.pid as libc::pid_t, signal) };
        if result != 0 {
            tracing::warn!(
                "Failed to signal job {}: {}",
                self.pid,
                std::io::Error::last_os_error()
            );
        }
        result == 0
    }

    #[cfg(not(unix))]
    fn control(&self, action: JobAction) -> bool {
        tracing::warn!("{:?} is not supported on this platform", action);
        false
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr, stdout carries the job's output
    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = MeshConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(lines) = args.lines {
        config.worker.ring_lines = lines;
    }
    if args.no_register {
        config.worker.register = false;
    }
    if args.no_announce {
        config.discovery.enabled = false;
    }

    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    let mut job = JobDescription::from_command(std::env::args().collect(), args.command.clone(), &cwd);
    job.start_time = args.start_time;
    job.end_time = args.end_time;

    let mut child = tokio::process::Command::new(&args.command[0])
        .args(&args.command[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to start {:?}", args.command[0]))?;
    tracing::info!("Started {} (pid {:?})", job.actual_command_line(), child.id());

    let control: Arc<dyn JobControl> = match child.id() {
        Some(pid) => Arc::new(SignalControl { pid }),
        None => Arc::new(Detached),
    };
    let log = Arc::new(OutputLog::new(config.worker.ring_lines, config.liveness.clone()));

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_output_reader(stdout, Arc::clone(&log), false));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_output_reader(stderr, Arc::clone(&log), true));
    }

    let server = WorkerServer::start(config, job, Arc::clone(&control), log)
        .await
        .context("Failed to start worker server")?;
    let stop = server.stop_token();
    let mut server = Some(server);

    let status = loop {
        tokio::select! {
            status = child.wait() => break status.context("Failed to wait for job")?,
            _ = stop.cancelled(), if server.is_some() => {
                if let Some(server) = server.take() {
                    server.shutdown().await;
                }
                tracing::info!("Server stopped, job keeps running");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, stopping job");
                control.control(JobAction::Stop);
            }
        }
    };

    for reader in readers {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
    }
    if let Some(server) = server.take() {
        server.shutdown().await;
    }

    tracing::info!("Job finished with {}", status);
    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}

/// Echo one output stream of the job and feed it into the log
fn spawn_output_reader<R>(stream: R, log: Arc<OutputLog>, is_stderr: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if is_stderr {
                        eprintln!("{}", line);
                    } else {
                        println!("{}", line);
                    }
                    log.insert(&line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Output stream closed: {}", e);
                    break;
                }
            }
        }
    })
}
