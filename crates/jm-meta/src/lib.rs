//! jm-meta: directory of running worker servers
//!
//! The meta-server keeps a table of workers that registered themselves or
//! were found by scanning subnets, validates the table periodically, and
//! relays single calls to workers on behalf of clients.

pub mod collector;
pub mod directory;
pub mod registrar;
pub mod server;
pub mod service;
pub mod validation;

pub use directory::{Admission, DirectoryHandle};
pub use registrar::Registrar;
pub use server::MetaServer;
pub use service::MetaService;
