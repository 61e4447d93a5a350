//! jm-protocol: RPC surface for jobmesh
//!
//! This crate defines the closed set of calls understood by worker servers
//! and the meta-server, the static introspection tables generated from them,
//! and the JSON reply envelope shared by every endpoint.

#[macro_use]
mod macros;

pub mod envelope;
pub mod error;
pub mod meta;
pub mod method;
pub mod worker;

pub use envelope::{decode_call, encode_call, Fault, RpcReply, NOT_AUTHENTICATED, RPC_PATH};
pub use error::ProtocolError;
pub use meta::{MetaCall, META_METHODS};
pub use method::{MethodDescriptor, RpcMethod};
pub use worker::{WorkerCall, WORKER_METHODS};
