//! jm-core: Shared machinery for jobmesh
//!
//! This crate provides configuration, typed errors, the authenticated RPC
//! transport (client and server side), the liveness probe and multicast
//! discovery used by the worker server, the meta-server and the CLI.

pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod probe;
pub mod rpc;
pub mod time;
pub mod transport;
pub mod types;

pub use config::MeshConfig;
pub use error::{AuthError, CallError, ConfigError, DiscoveryError, MeshError};
pub use transport::{RpcClient, Security};
pub use types::{EndpointId, ProcessId, WorkerMetadata, WorkerRecord};

/// Version string reported by `meshVersion`
pub const MESH_VERSION: &str = env!("CARGO_PKG_VERSION");
