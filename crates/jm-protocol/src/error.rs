//! Protocol error types

use thiserror::Error;

/// Errors raised while decoding or encoding calls and replies
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Body is not a call object
    #[error("Malformed call: {0}")]
    Malformed(String),

    /// Method name not in the introspection table
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Method exists but its parameters do not match
    #[error("Invalid parameters for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    /// JSON error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
