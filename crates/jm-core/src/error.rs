//! Core error types for jobmesh

use jm_protocol::{Fault, ProtocolError};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the jobmesh ecosystem
#[derive(Error, Debug)]
pub enum MeshError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Remote call failed
    #[error("Call failed: {0}")]
    Call(#[from] CallError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Authentication setup error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Discovery error
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one remote call
///
/// Transport faults (everything but `Fault`) are produced at the call site
/// and never escape as panics or unrelated errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// Nothing listens on the port
    #[error("Connection refused: {0}")]
    Refused(String),

    /// Connect or response exceeded the configured timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Host or network unreachable, or connection reset
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// TLS handshake or certificate verification failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Other HTTP-level failure (bad status, broken body)
    #[error("HTTP error: {0}")]
    Http(String),

    /// The endpoint answered with a protocol fault
    #[error("Fault {}: {}", .0.code, .0.message)]
    Fault(Fault),

    /// The reply could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl CallError {
    /// Whether the endpoint was reached at all
    ///
    /// Faults and decode errors mean something answered; everything else
    /// means the call never got a reply.
    pub fn is_transport(&self) -> bool {
        !matches!(self, CallError::Fault(_) | CallError::Decode(_))
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Key management and challenge verification errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// Key file could not be read or written
    #[error("Key file error: {0}")]
    Io(#[from] std::io::Error),

    /// Key or signature encoding error
    #[error("Key error: {0}")]
    Key(#[from] ssh_key::Error),

    /// Authorization header is not `Basic <base64(user:challenge)>`
    #[error("Malformed credentials: {0}")]
    Malformed(String),

    /// No public key known for the user
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Challenge older than the accepted age
    #[error("Challenge expired")]
    Expired,

    /// Signature does not verify
    #[error("Challenge signature mismatch")]
    BadSignature,
}

/// Multicast discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Socket setup or send failed
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram could not be encoded
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
