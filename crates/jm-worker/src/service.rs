//! Answers to the calls a worker understands

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jm_core::config::MeshConfig;
use jm_core::rpc::{RequestContext, RpcService};
use jm_core::time::{elapsed_since, unix_now};
use jm_core::{host, MESH_VERSION};
use jm_protocol::method::{list_methods, method_help};
use jm_protocol::{Fault, RpcReply, WorkerCall, WORKER_METHODS};
use tokio_util::sync::CancellationToken;

use crate::files;
use crate::job::{JobAction, JobControl, JobDescription};
use crate::metrics::{load_average, ProcessMetrics};
use crate::output::OutputLog;

/// Who and where the worker is
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    /// Address reported to others
    pub ip: String,
    /// Bound RPC port
    pub port: u16,
    /// Whether the port speaks TLS
    pub ssl: bool,
    /// Unix time the worker started
    pub started_at: f64,
    /// Host name
    pub hostname: String,
    /// User running the job
    pub user: String,
}

impl WorkerIdentity {
    /// `ip:port:start_timestamp`
    pub fn id(&self) -> String {
        format!("{}:{}:{:.6}", self.ip, self.port, self.started_at)
    }
}

/// RPC service of one worker
pub struct WorkerService {
    config: MeshConfig,
    job: JobDescription,
    control: Arc<dyn JobControl>,
    log: Arc<OutputLog>,
    identity: WorkerIdentity,
    metrics: ProcessMetrics,
    remark: Mutex<Option<String>>,
    stop_requested: CancellationToken,
}

impl WorkerService {
    /// Create the service
    pub fn new(
        config: MeshConfig,
        job: JobDescription,
        control: Arc<dyn JobControl>,
        log: Arc<OutputLog>,
        identity: WorkerIdentity,
        stop_requested: CancellationToken,
    ) -> Self {
        Self {
            config,
            job,
            control,
            log,
            identity,
            metrics: ProcessMetrics::new(),
            remark: Mutex::new(None),
            stop_requested,
        }
    }

    /// Identity of this worker
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Job description
    pub fn job(&self) -> &JobDescription {
        &self.job
    }

    fn job_pid(&self) -> u32 {
        self.control.pid().unwrap_or_else(std::process::id)
    }

    fn act(&self, action: JobAction) -> RpcReply {
        tracing::info!("{:?} requested", action);
        RpcReply::ok(self.control.control(action))
    }

    fn file_reply<T: serde::Serialize>(
        &self,
        result: Result<T, files::FileAccessError>,
    ) -> RpcReply {
        match result {
            Ok(value) => RpcReply::ok(value),
            Err(e) => RpcReply::fault(Fault::APPLICATION_ERROR, e.to_string()),
        }
    }

    fn set_remark(&self, remark: String) -> bool {
        let mut current = self.remark.lock().unwrap_or_else(|p| p.into_inner());
        current.replace(remark).is_some()
    }

    fn remark(&self) -> String {
        self.remark
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RpcService for WorkerService {
    type Call = WorkerCall;

    async fn handle(&self, call: WorkerCall, _ctx: &RequestContext) -> RpcReply {
        let job_path = &self.job.job_path;

        match call {
            WorkerCall::IsWorker => RpcReply::ok(true),
            WorkerCall::IsLiving => RpcReply::ok(self.log.is_living()),

            WorkerCall::Pid => RpcReply::ok(std::process::id()),
            WorkerCall::Ip => RpcReply::ok(&self.identity.ip),
            WorkerCall::Hostname => RpcReply::ok(&self.identity.hostname),
            WorkerCall::User => RpcReply::ok(&self.identity.user),
            WorkerCall::Id => RpcReply::ok(self.identity.id()),
            WorkerCall::StartTimestamp => RpcReply::ok(self.identity.started_at),
            WorkerCall::Uname => RpcReply::ok(host::uname()),

            WorkerCall::CommandLine => RpcReply::ok(self.job.command_line()),
            WorkerCall::Argv => RpcReply::ok(&self.job.argv),
            WorkerCall::ActualCommandLine => RpcReply::ok(self.job.actual_command_line()),
            WorkerCall::IsParallel => RpcReply::ok(self.job.is_parallel),
            WorkerCall::ProcNr => RpcReply::ok(self.job.proc_nr),
            WorkerCall::JobName => RpcReply::ok(&self.job.job_name),
            WorkerCall::JobId => RpcReply::ok(self.job.job_id.clone().unwrap_or_default()),
            WorkerCall::Mpi => RpcReply::ok(&self.job.mpi),
            WorkerCall::FrameworkVersion => RpcReply::ok(&self.job.framework_version),
            WorkerCall::MeshVersion => RpcReply::ok(MESH_VERSION),

            WorkerCall::ElapsedTime => RpcReply::ok(self.log.seconds_since_output()),
            WorkerCall::WallTime => RpcReply::ok(elapsed_since(self.identity.started_at)),
            WorkerCall::LoadAverage => RpcReply::ok(load_average()),
            WorkerCall::MemoryUsed => RpcReply::ok(self.metrics.sample(self.job_pid()).0),
            WorkerCall::CpuUsage => RpcReply::ok(self.metrics.sample(self.job_pid()).1),
            WorkerCall::Time => RpcReply::ok(self.log.sim_time()),
            WorkerCall::CreateTime => RpcReply::ok(self.log.create_time()),
            WorkerCall::StartTime => RpcReply::ok(self.job.start_time.unwrap_or(0.0)),
            WorkerCall::EndTime => RpcReply::ok(self.job.end_time.unwrap_or(0.0)),
            WorkerCall::LastLogLineSeen => RpcReply::ok(self.log.last_line_seen()),
            WorkerCall::LastTimeStepSeen => RpcReply::ok(self.log.last_time_step_seen()),
            WorkerCall::NrWarnings => RpcReply::ok(self.log.warnings()),

            WorkerCall::Stop => self.act(JobAction::Stop),
            WorkerCall::StopAtNextWrite => self.act(JobAction::StopAtNextWrite),
            WorkerCall::Write => self.act(JobAction::Write),
            WorkerCall::Kill => self.act(JobAction::Kill),
            WorkerCall::KillServer => {
                tracing::info!("Server shutdown requested at {}", unix_now());
                self.stop_requested.cancel();
                RpcReply::ok(true)
            }

            WorkerCall::LastLine => RpcReply::ok(self.log.last_line()),
            WorkerCall::Tail => RpcReply::ok(self.log.tail()),

            WorkerCall::GetEnviron { name } => {
                RpcReply::ok(std::env::var(name).unwrap_or_default())
            }
            WorkerCall::Configuration => match toml::to_string_pretty(&self.config) {
                Ok(text) => RpcReply::ok(text),
                Err(e) => RpcReply::fault(Fault::INTERNAL_ERROR, e.to_string()),
            },

            WorkerCall::GetRemark => RpcReply::ok(self.remark()),
            WorkerCall::SetRemark { remark } => RpcReply::ok(self.set_remark(remark)),

            WorkerCall::Cwd => match std::env::current_dir() {
                Ok(dir) => RpcReply::ok(dir.to_string_lossy()),
                Err(e) => RpcReply::fault(Fault::INTERNAL_ERROR, e.to_string()),
            },
            WorkerCall::JobPath => RpcReply::ok(job_path.to_string_lossy()),
            WorkerCall::ListFiles { directory } => {
                self.file_reply(files::list_files(job_path, &directory))
            }
            WorkerCall::GetDictionaryText { directory, name } => {
                self.file_reply(files::read_text(job_path, &directory, &name))
            }
            WorkerCall::WriteDictionaryText {
                directory,
                name,
                text,
            } => self.file_reply(
                files::write_text(job_path, &directory, &name, &text).map(|()| true),
            ),

            WorkerCall::ListMethods => RpcReply::ok(list_methods(WORKER_METHODS)),
            WorkerCall::MethodHelp { method } => RpcReply::ok(method_help(WORKER_METHODS, &method)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RecordingControl;
    use serde_json::{json, Value};

    fn service(control: Arc<RecordingControl>, job_path: &std::path::Path) -> WorkerService {
        let config = MeshConfig::default();
        let log = Arc::new(OutputLog::new(5, config.liveness.clone()));
        log.insert("Time = 1");
        log.insert("last words");
        WorkerService::new(
            config,
            JobDescription::from_command(
                vec!["jm-worker".into()],
                vec!["solver".into()],
                job_path,
            ),
            control,
            log,
            WorkerIdentity {
                ip: "10.0.0.7".to_string(),
                port: 18004,
                ssl: false,
                started_at: 1_700_000_000.5,
                hostname: "node7".to_string(),
                user: "alice".to_string(),
            },
            CancellationToken::new(),
        )
    }

    async fn ask(service: &WorkerService, call: WorkerCall) -> Value {
        service
            .handle(call, &RequestContext::default())
            .await
            .into_result()
            .unwrap()
    }

    #[tokio::test]
    async fn test_identity() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::default(), dir.path());
        assert_eq!(ask(&service, WorkerCall::IsWorker).await, json!(true));
        assert_eq!(
            ask(&service, WorkerCall::Id).await,
            json!("10.0.0.7:18004:1700000000.500000")
        );
        assert_eq!(ask(&service, WorkerCall::Pid).await, json!(std::process::id()));
    }

    #[tokio::test]
    async fn test_output_calls() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::default(), dir.path());
        assert_eq!(ask(&service, WorkerCall::LastLine).await, json!("last words"));
        assert_eq!(ask(&service, WorkerCall::Tail).await, json!("Time = 1\nlast words\n"));
        assert_eq!(ask(&service, WorkerCall::Time).await, json!(1.0));
        assert_eq!(ask(&service, WorkerCall::IsLiving).await, json!(true));
    }

    #[tokio::test]
    async fn test_control_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let control = Arc::new(RecordingControl::default());
        let service = service(Arc::clone(&control), dir.path());

        assert_eq!(ask(&service, WorkerCall::Write).await, json!(true));
        assert_eq!(ask(&service, WorkerCall::Stop).await, json!(true));
        assert_eq!(control.actions(), vec![JobAction::Write, JobAction::Stop]);
    }

    #[tokio::test]
    async fn test_remark() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::default(), dir.path());
        assert_eq!(ask(&service, WorkerCall::GetRemark).await, json!(""));

        let set = WorkerCall::SetRemark {
            remark: "mesh refined".to_string(),
        };
        assert_eq!(ask(&service, set.clone()).await, json!(false));
        assert_eq!(ask(&service, set).await, json!(true));
        assert_eq!(ask(&service, WorkerCall::GetRemark).await, json!("mesh refined"));
    }

    #[tokio::test]
    async fn test_file_access_is_scoped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("system")).unwrap();
        let service = service(Arc::default(), dir.path());

        let write = WorkerCall::WriteDictionaryText {
            directory: "system".to_string(),
            name: "controlDict".to_string(),
            text: "endTime 5;".to_string(),
        };
        assert_eq!(ask(&service, write).await, json!(true));
        assert_eq!(
            ask(
                &service,
                WorkerCall::ListFiles {
                    directory: "system".to_string()
                }
            )
            .await,
            json!(["controlDict"])
        );

        let escape = WorkerCall::GetDictionaryText {
            directory: "..".to_string(),
            name: "passwd".to_string(),
        };
        let reply = service.handle(escape, &RequestContext::default()).await;
        assert!(matches!(reply, RpcReply::Fault(f) if f.code == Fault::APPLICATION_ERROR));
    }

    #[tokio::test]
    async fn test_introspection() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::default(), dir.path());
        let methods = ask(&service, WorkerCall::ListMethods).await;
        assert!(methods.as_array().unwrap().contains(&json!("tail")));

        let help = ask(
            &service,
            WorkerCall::MethodHelp {
                method: "tail".to_string(),
            },
        )
        .await;
        assert!(help.as_str().unwrap().contains("requires authentication"));
    }

    #[tokio::test]
    async fn test_kill_server_requests_stop() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::default(), dir.path());
        ask(&service, WorkerCall::KillServer).await;
        assert!(service.stop_requested.is_cancelled());
    }
}
