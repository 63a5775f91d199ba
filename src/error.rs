//! Error types for rpc-auth

use std::io;

use thiserror::Error;

use crate::rpc::StatusCode;

/// Result type alias for rpc-auth
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error kept as the underlying cause of a configuration failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// rpc-auth errors
#[derive(Error, Debug)]
pub enum Error {
    /// Missing, malformed or inconsistent configuration / credential material
    #[error("Configuration error: {message}")]
    Config {
        /// What was being configured
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<BoxError>,
    },

    /// Credential file could not be read
    #[error("IO error reading '{path}': {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// A credential that needs a secure channel was offered over plaintext
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// The call carried no usable authorization metadata
    #[error("missing credentials")]
    MissingCredentials,

    /// The call's credentials were present but rejected by policy
    #[error("invalid credentials")]
    InvalidCredentials,

    /// TLS handshake with the peer failed
    #[error("TLS handshake with {peer} failed: {source}")]
    Handshake {
        /// Peer address or name
        peer: String,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// Transport error (socket closed, write failed, ...)
    #[error("Transport error: {message}")]
    Transport {
        /// What failed
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<io::Error>,
    },

    /// Malformed envelope or unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The call deadline expired
    #[error("Call cancelled: {0}")]
    Cancelled(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Method not served
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Error status returned by the remote peer
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Status code
        code: StatusCode,
        /// Status message
        message: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Configuration error without an underlying cause
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Configuration error wrapping its cause
    pub fn config_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Transport error wrapping an IO cause
    pub fn transport(message: impl Into<String>, source: io::Error) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Map to the wire status code
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Rpc { code, .. } => *code,
            Self::MissingCredentials | Self::Protocol(_) | Self::Json(_) => {
                StatusCode::InvalidArgument
            }
            Self::InvalidCredentials => StatusCode::Unauthenticated,
            Self::NotFound(_) => StatusCode::NotFound,
            Self::Cancelled(_) => StatusCode::DeadlineExceeded,
            Self::Unimplemented(_) => StatusCode::Unimplemented,
            Self::Handshake { .. } | Self::Transport { .. } => StatusCode::Unavailable,
            Self::SecurityViolation(_) => StatusCode::FailedPrecondition,
            Self::Config { .. } | Self::Io { .. } | Self::Internal(_) => StatusCode::Internal,
        }
    }
}
