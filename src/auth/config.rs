//! Validation policy configuration.
//!
//! # Example YAML
//!
//! ```yaml
//! auth:
//!   policies:
//!     - type: shared_secret
//!       username: admin
//!       password: "env:CATALOG_ADMIN_PASSWORD"
//!     - type: static_token
//!       token: "env:CATALOG_TOKEN"
//!     - type: peer_identity
//!       rules:
//!         - cn: "inventory-*"
//!         - san_uri: "spiffe://shop.example/*"
//! ```

use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Server-side authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Policies consulted in order; the first that accepts admits the call.
    pub policies: Vec<PolicyConfig>,
}

/// One validation policy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Username and password carried in a Basic `authorization` value.
    SharedSecret {
        /// Expected username
        username: String,
        /// Expected password (literal or `env:VAR`)
        password: String,
    },
    /// Opaque token carried in a Bearer `authorization` value.
    StaticToken {
        /// Expected token (literal or `env:VAR`)
        token: String,
    },
    /// Verified mutual-TLS client certificate.
    PeerIdentity {
        /// Match rules; a peer is admitted when any rule matches.
        #[serde(default)]
        rules: Vec<PeerMatchConfig>,
    },
}

impl PolicyConfig {
    /// Policy type label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SharedSecret { .. } => "shared_secret",
            Self::StaticToken { .. } => "static_token",
            Self::PeerIdentity { .. } => "peer_identity",
        }
    }
}

impl fmt::Debug for PolicyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedSecret { username, .. } => f
                .debug_struct("SharedSecret")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::StaticToken { .. } => f
                .debug_struct("StaticToken")
                .field("token", &"<redacted>")
                .finish(),
            Self::PeerIdentity { rules } => f
                .debug_struct("PeerIdentity")
                .field("rules", rules)
                .finish(),
        }
    }
}

/// Certificate match criteria for one peer identity rule.
///
/// All specified fields must match. Each accepts a glob: `*` alone,
/// `prefix*`, `*suffix`, `*contains*` or an exact string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerMatchConfig {
    /// Subject Common Name
    pub cn: Option<String>,
    /// Subject Organisational Unit
    pub ou: Option<String>,
    /// Any SAN URI entry
    pub san_uri: Option<String>,
    /// Any SAN DNS entry
    pub san_dns: Option<String>,
    /// Match every verified peer
    pub any: bool,
}

/// Resolve a secret value.
///
/// `env:VAR` reads the environment variable `VAR`; anything else is taken
/// literally. A referenced variable that is unset is a configuration error.
pub fn resolve_secret(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name)
            .map_err(|e| Error::config_with(format!("secret references unset variable '{var_name}'"), e)),
        None => Ok(value.to_string()),
    }
}
