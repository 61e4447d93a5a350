//! Description and control of the job a worker server is embedded in

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Environment variables holding a queuing-system job id, in lookup order
const JOB_ID_VARIABLES: &[&str] = &["SLURM_JOB_ID", "PBS_JOBID", "LSB_JOBID", "JOB_ID"];

/// Control request forwarded to the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    /// Finish gracefully after writing the current state
    Stop,
    /// Finish gracefully at the next regular write
    StopAtNextWrite,
    /// Write the current state and continue
    Write,
    /// Terminate immediately
    Kill,
}

/// Something that can act on the running job
///
/// The runner binary implements this with signals; an embedding
/// application can implement it with whatever its job understands.
pub trait JobControl: Send + Sync + 'static {
    /// Forward one action, returning whether it was delivered
    fn control(&self, action: JobAction) -> bool;

    /// Process id of the job, when it is a separate process
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Job control that refuses every action
#[derive(Debug, Default)]
pub struct Detached;

impl JobControl for Detached {
    fn control(&self, _action: JobAction) -> bool {
        false
    }
}

/// Job control that records every action, for embedding and tests
#[derive(Debug, Default)]
pub struct RecordingControl {
    actions: Mutex<Vec<JobAction>>,
}

impl RecordingControl {
    /// Actions received so far
    pub fn actions(&self) -> Vec<JobAction> {
        self.actions
            .lock()
            .map(|actions| actions.clone())
            .unwrap_or_default()
    }
}

impl JobControl for RecordingControl {
    fn control(&self, action: JobAction) -> bool {
        match self.actions.lock() {
            Ok(mut actions) => {
                actions.push(action);
                true
            }
            Err(_) => false,
        }
    }
}

/// Static facts about the job
#[derive(Debug, Clone, Default)]
pub struct JobDescription {
    /// Arguments the runner itself was started with
    pub argv: Vec<String>,
    /// Command actually executed
    pub command: Vec<String>,
    /// Directory the job works in
    pub job_path: PathBuf,
    /// Job name
    pub job_name: String,
    /// Whether the job runs in parallel
    pub is_parallel: bool,
    /// Number of processors used
    pub proc_nr: u32,
    /// MPI flavour, if any
    pub mpi: Option<String>,
    /// Version of the simulation framework
    pub framework_version: String,
    /// Queuing-system job id
    pub job_id: Option<String>,
    /// Simulated start time, if known
    pub start_time: Option<f64>,
    /// Simulated end time, if known
    pub end_time: Option<f64>,
}

impl JobDescription {
    /// Describe a job running `command` in `job_path`
    ///
    /// Parallel runs are recognised by an `mpirun`/`mpiexec` launcher or a
    /// `-parallel` flag; the processor count comes from `-np`/`-n`.
    pub fn from_command(argv: Vec<String>, command: Vec<String>, job_path: &Path) -> Self {
        let launcher = command
            .first()
            .map(|program| {
                Path::new(program)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .filter(|name| name == "mpirun" || name == "mpiexec");

        let is_parallel =
            launcher.is_some() || command.iter().any(|arg| arg == "-parallel");
        let proc_nr = command
            .windows(2)
            .find(|pair| pair[0] == "-np" || pair[0] == "-n")
            .and_then(|pair| pair[1].parse().ok())
            .unwrap_or(1);

        let mpi = std::env::var("WM_MPLIB")
            .ok()
            .filter(|v| !v.is_empty())
            .or(if is_parallel { launcher } else { None });

        let job_name = job_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            argv,
            command,
            job_path: job_path.to_path_buf(),
            job_name,
            is_parallel,
            proc_nr,
            mpi,
            framework_version: std::env::var("WM_PROJECT_VERSION").unwrap_or_default(),
            job_id: job_id_from_env(),
            start_time: None,
            end_time: None,
        }
    }

    /// Command line of the runner
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }

    /// Command line of the executed job
    pub fn actual_command_line(&self) -> String {
        self.command.join(" ")
    }
}

fn job_id_from_env() -> Option<String> {
    JOB_ID_VARIABLES
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_serial_job() {
        let job = JobDescription::from_command(
            args(&["jm-worker", "--", "simpleFoam"]),
            args(&["simpleFoam"]),
            Path::new("/scratch/runs/pitzDaily"),
        );
        assert!(!job.is_parallel);
        assert_eq!(job.proc_nr, 1);
        assert_eq!(job.job_name, "pitzDaily");
        assert_eq!(job.actual_command_line(), "simpleFoam");
        assert_eq!(job.command_line(), "jm-worker -- simpleFoam");
    }

    #[test]
    fn test_parallel_job() {
        let job = JobDescription::from_command(
            Vec::new(),
            args(&["/usr/bin/mpirun", "-np", "8", "simpleFoam", "-parallel"]),
            Path::new("/scratch/runs/pitzDaily"),
        );
        assert!(job.is_parallel);
        assert_eq!(job.proc_nr, 8);
        assert!(job.mpi.is_some());
    }

    #[test]
    fn test_recording_control() {
        let control = RecordingControl::default();
        assert!(control.control(JobAction::Write));
        assert!(control.control(JobAction::Stop));
        assert_eq!(control.actions(), vec![JobAction::Write, JobAction::Stop]);
        assert!(!Detached.control(JobAction::Kill));
    }
}
