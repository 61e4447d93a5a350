//! jobmesh: command-line interface
//!
//! Lists workers known to the meta-server, discovers workers via multicast,
//! and calls worker methods directly or through the meta-server.

pub mod call;
pub mod commands;
pub mod output;
