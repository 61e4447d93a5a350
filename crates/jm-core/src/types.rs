//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a worker listens: the primary key of the directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl EndpointId {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Which process answers on an endpoint
///
/// Two registrations for the same endpoint with different process ids are
/// two different workers: the port was reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId {
    /// Address the worker reports for itself
    pub ip: String,
    /// Operating-system process id
    pub pid: u32,
}

impl ProcessId {
    /// Create a new process identity
    pub fn new(ip: impl Into<String>, pid: u32) -> Self {
        Self { ip: ip.into(), pid }
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.pid)
    }
}

/// Static description of a worker, captured once at registration
///
/// Live values (elapsed time, simulated time, resource usage) are not part
/// of this snapshot; they are fetched from the worker on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerMetadata {
    /// Command line of the job
    pub command_line: String,
    /// Working directory of the job
    pub cwd: String,
    /// Host name the worker runs on
    pub hostname: String,
    /// User running the job
    pub user: String,
    /// Job name (usually the case directory)
    pub job_name: String,
    /// Whether the job runs in parallel
    pub is_parallel: bool,
    /// Version of the simulation framework
    pub framework_version: String,
    /// jobmesh version of the worker
    pub mesh_version: String,
    /// MPI flavour, if any
    pub mpi: Option<String>,
}

/// One entry of the meta-server directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Where the worker listens
    pub endpoint: EndpointId,
    /// Which process answers there
    pub process: ProcessId,
    /// Whether the worker speaks TLS
    pub ssl: bool,
    /// Snapshot taken at registration
    pub metadata: WorkerMetadata,
}

impl WorkerRecord {
    /// Directory key
    pub fn key(&self) -> &EndpointId {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let endpoint = EndpointId::new("10.0.0.5", 18003);
        assert_eq!(endpoint.to_string(), "10.0.0.5:18003");
    }

    #[test]
    fn test_metadata_defaults_missing_fields() {
        let metadata: WorkerMetadata =
            serde_json::from_str(r#"{"command_line": "solver -case a"}"#).unwrap();
        assert_eq!(metadata.command_line, "solver -case a");
        assert!(!metadata.is_parallel);
        assert_eq!(metadata.mpi, None);
        assert!(metadata.mesh_version.is_empty());
    }
}
