//! JSON-RPC call envelope.
//!
//! One JSON object per line in each direction. Requests carry call metadata
//! and an optional client deadline next to the usual JSON-RPC fields.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Metadata;

/// JSON-RPC version tag
pub const JSONRPC_VERSION: &str = "2.0";

/// Call status code, carried as its upper-case name on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// Success
    Ok,
    /// Malformed request, including absent credentials
    InvalidArgument,
    /// Deadline expired before completion
    DeadlineExceeded,
    /// Entity not found
    NotFound,
    /// Operation rejected because of the channel state
    FailedPrecondition,
    /// Method not served
    Unimplemented,
    /// Server-side failure
    Internal,
    /// Peer unreachable or connection lost
    Unavailable,
    /// Credentials present but rejected
    Unauthenticated,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}

/// Call request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID, unique per connection
    pub id: u64,
    /// Fully qualified method, e.g. `ProductInfo/AddProduct`
    pub method: String,
    /// Call metadata. `None` means the client sent no metadata at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Remaining client deadline in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Build a request
    pub fn new(id: u64, method: impl Into<String>, metadata: Metadata, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            metadata: Some(metadata),
            timeout_ms: None,
            params: Some(params),
        }
    }

    /// Attach the remaining deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Deadline requested by the client, if any
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Error status in a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    /// Status code
    pub code: StatusCode,
    /// Human-readable message
    pub message: String,
}

/// Call response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// ID of the request this answers
    pub id: u64,
    /// Result (on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcStatus>,
}

impl RpcResponse {
    /// Create a success response
    #[must_use]
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcStatus {
                code,
                message: message.into(),
            }),
        }
    }

    /// Convert into the call outcome seen by the client
    ///
    /// `DEADLINE_EXCEEDED` becomes [`crate::Error::Cancelled`], the same error
    /// the client raises when its own timer fires first.
    pub fn into_result(self) -> crate::Result<Value> {
        match (self.error, self.result) {
            (Some(status), _) if status.code == StatusCode::DeadlineExceeded => {
                Err(crate::Error::Cancelled(status.message))
            }
            (Some(status), _) => Err(crate::Error::Rpc {
                code: status.code,
                message: status.message,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}
