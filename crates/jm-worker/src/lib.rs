//! jm-worker: RPC endpoint embedded in a running job
//!
//! The worker server binds the first free port of its range, answers
//! status and control calls about the job, keeps the job's recent output,
//! and announces and registers itself so it can be found.

pub mod backoff;
pub mod files;
pub mod job;
pub mod metrics;
pub mod output;
pub mod server;
pub mod service;
pub mod state;

pub use job::{JobAction, JobControl, JobDescription};
pub use output::{OutputLog, RingBuffer};
pub use server::WorkerServer;
pub use service::{WorkerIdentity, WorkerService};
pub use state::WorkerState;
