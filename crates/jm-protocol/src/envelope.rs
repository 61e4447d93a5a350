//! Call and reply encoding
//!
//! A call is the JSON object `{"method": "<name>", "params": {...}}` posted
//! to [`RPC_PATH`]. The reply is either `{"result": <value>}` or
//! `{"fault": {"code": <i32>, "message": "<text>"}}`.
//!
//! Authentication failures are not faults: a sensitive method called without
//! a valid challenge answers with the [`NOT_AUTHENTICATED`] string so a
//! caller can tell "not allowed" apart from "service down".

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::method::{lookup, RpcMethod};

/// HTTP path every endpoint serves calls on
pub const RPC_PATH: &str = "/RPC2";

/// Result returned by sensitive methods for unauthenticated callers
pub const NOT_AUTHENTICATED: &str = "Sorry. You're not authenticated for this";

/// Protocol-level failure of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Fault code (JSON-RPC style)
    pub code: i32,
    /// Human-readable description
    pub message: String,
}

impl Fault {
    /// Body could not be parsed
    pub const PARSE_ERROR: i32 = -32700;
    /// Method not known to this endpoint
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Parameters do not match the method
    pub const INVALID_PARAMS: i32 = -32602;
    /// Handler failed
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Handler refused the call for an application reason
    pub const APPLICATION_ERROR: i32 = -32500;

    /// Create a fault
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Fault {}: {}>", self.code, self.message)
    }
}

impl From<ProtocolError> for Fault {
    fn from(err: ProtocolError) -> Self {
        let code = match &err {
            ProtocolError::Malformed(_) | ProtocolError::Serialization(_) => Fault::PARSE_ERROR,
            ProtocolError::UnknownMethod(_) => Fault::METHOD_NOT_FOUND,
            ProtocolError::InvalidParams { .. } => Fault::INVALID_PARAMS,
        };
        Fault::new(code, err.to_string())
    }
}

/// Reply to one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcReply {
    /// Successful result
    Result(Value),
    /// Protocol-level failure
    Fault(Fault),
}

impl RpcReply {
    /// Wrap a serializable result
    pub fn ok<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => RpcReply::Result(value),
            Err(e) => RpcReply::Fault(Fault::new(
                Fault::INTERNAL_ERROR,
                format!("Failed to encode result: {}", e),
            )),
        }
    }

    /// Build a fault reply
    pub fn fault(code: i32, message: impl Into<String>) -> Self {
        RpcReply::Fault(Fault::new(code, message))
    }

    /// The soft answer for sensitive methods called without credentials
    pub fn not_authenticated() -> Self {
        RpcReply::Result(Value::String(NOT_AUTHENTICATED.to_string()))
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> Result<Value, Fault> {
        match self {
            RpcReply::Result(value) => Ok(value),
            RpcReply::Fault(fault) => Err(fault),
        }
    }
}

/// Encode a call for the wire
pub fn encode_call<C: Serialize>(call: &C) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(call)?)
}

/// Decode a call body, telling unknown methods apart from bad parameters
pub fn decode_call<C>(body: &[u8]) -> Result<C, ProtocolError>
where
    C: RpcMethod + DeserializeOwned,
{
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    decode_value(value)
}

pub(crate) fn decode_value<C>(value: Value) -> Result<C, ProtocolError>
where
    C: RpcMethod + DeserializeOwned,
{
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing \"method\" string".to_string()))?
        .to_string();

    if lookup(C::table(), &method).is_none() {
        return Err(ProtocolError::UnknownMethod(method));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidParams {
        method,
        reason: e.to_string(),
    })
}
