//! Channel security configuration.
//!
//! # Example YAML
//!
//! ```yaml
//! channel:
//!   mode: mutual_auth
//!   cert:    "/etc/rpc-auth/tls/server.crt"
//!   key:     "/etc/rpc-auth/tls/server.key"
//!   ca_cert: "/etc/rpc-auth/tls/ca.crt"
//! ```

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How the transport is secured before any call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// No encryption, no peer verification.
    #[default]
    Plaintext,
    /// TLS; the client verifies the server, the server does not ask for a
    /// client certificate.
    ServerAuthOnly,
    /// TLS; both endpoints present certificates chaining to the trust bundle.
    MutualAuth,
}

impl ChannelMode {
    /// Whether the channel is encrypted.
    #[must_use]
    pub fn is_secure(self) -> bool {
        !matches!(self, Self::Plaintext)
    }

    /// Name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plaintext => "plaintext",
            Self::ServerAuthOnly => "server_auth_only",
            Self::MutualAuth => "mutual_auth",
        }
    }
}

/// Channel security settings for one endpoint (server or client).
///
/// Paths point at PEM files. Which fields are required depends on the mode
/// and the side; see [`ChannelSecurityConfig::validate_server`] and
/// [`ChannelSecurityConfig::validate_client`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSecurityConfig {
    /// Security mode.
    pub mode: ChannelMode,

    /// Local identity: PEM certificate chain.
    pub cert: Option<String>,

    /// Local identity: PEM private key.
    pub key: Option<String>,

    /// Trust bundle: one or more PEM CA certificates.
    pub ca_cert: Option<String>,

    /// Name the server certificate must carry (client side only).
    pub expected_peer_name: Option<String>,
}

impl ChannelSecurityConfig {
    /// Plaintext channel.
    #[must_use]
    pub fn plaintext() -> Self {
        Self::default()
    }

    /// One-way TLS server: presents `cert`/`key`, asks nothing of clients.
    pub fn server_auth(cert: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            mode: ChannelMode::ServerAuthOnly,
            cert: Some(cert.into()),
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// One-way TLS client: trusts servers chaining to `ca_cert`.
    pub fn server_auth_client(ca_cert: impl Into<String>) -> Self {
        Self {
            mode: ChannelMode::ServerAuthOnly,
            ca_cert: Some(ca_cert.into()),
            ..Self::default()
        }
    }

    /// Mutual TLS, either side.
    pub fn mutual_auth(
        cert: impl Into<String>,
        key: impl Into<String>,
        ca_cert: impl Into<String>,
    ) -> Self {
        Self {
            mode: ChannelMode::MutualAuth,
            cert: Some(cert.into()),
            key: Some(key.into()),
            ca_cert: Some(ca_cert.into()),
            expected_peer_name: None,
        }
    }

    /// Set the expected server name.
    #[must_use]
    pub fn with_expected_peer_name(mut self, name: impl Into<String>) -> Self {
        self.expected_peer_name = Some(name.into());
        self
    }

    /// Check the server-side invariants.
    ///
    /// `ServerAuthOnly` needs a local identity; `MutualAuth` additionally
    /// needs the trust bundle used to verify clients.
    pub fn validate_server(&self) -> Result<()> {
        self.check_pairing()?;
        match self.mode {
            ChannelMode::Plaintext => Ok(()),
            ChannelMode::ServerAuthOnly => self.require_identity("server"),
            ChannelMode::MutualAuth => {
                self.require_identity("server")?;
                self.require_trust_bundle("server")
            }
        }
    }

    /// Check the client-side invariants.
    ///
    /// `ServerAuthOnly` needs the trust bundle; `MutualAuth` additionally
    /// needs a local identity to present.
    pub fn validate_client(&self) -> Result<()> {
        self.check_pairing()?;
        match self.mode {
            ChannelMode::Plaintext => Ok(()),
            ChannelMode::ServerAuthOnly => self.require_trust_bundle("client"),
            ChannelMode::MutualAuth => {
                self.require_trust_bundle("client")?;
                self.require_identity("client")
            }
        }
    }

    /// Local identity paths, when both are set.
    #[must_use]
    pub fn identity_paths(&self) -> Option<(&str, &str)> {
        match (self.cert.as_deref(), self.key.as_deref()) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }

    fn check_pairing(&self) -> Result<()> {
        match (&self.cert, &self.key) {
            (Some(_), None) => Err(Error::config("'cert' is set but 'key' is missing")),
            (None, Some(_)) => Err(Error::config("'key' is set but 'cert' is missing")),
            _ => Ok(()),
        }
    }

    fn require_identity(&self, side: &str) -> Result<()> {
        if self.identity_paths().is_none() {
            return Err(Error::config(format!(
                "{} mode requires a {side} certificate and key",
                self.mode.as_str()
            )));
        }
        Ok(())
    }

    fn require_trust_bundle(&self, side: &str) -> Result<()> {
        if self.ca_cert.as_deref().is_none_or(str::is_empty) {
            return Err(Error::config(format!(
                "{} mode requires a {side} trust bundle ('ca_cert')",
                self.mode.as_str()
            )));
        }
        Ok(())
    }
}
