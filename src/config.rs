//! Configuration management
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. YAML file passed with `--config`
//! 3. `RPC_AUTH_`-prefixed environment variables, `__` separating sections
//!    (`RPC_AUTH_SERVER__PORT=6000`, `RPC_AUTH_CHANNEL__MODE=mutual_auth`)
//!
//! # Example YAML
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 50051
//!   request_timeout: 30s
//! channel:
//!   mode: server_auth_only
//!   cert: certs/server.crt
//!   key: certs/server.key
//! auth:
//!   policies:
//!     - type: shared_secret
//!       username: admin
//!       password: "env:CATALOG_ADMIN_PASSWORD"
//! ```

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthConfig, resolve_secret};
use crate::channel::ChannelSecurityConfig;
use crate::credentials::CallCredential;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Client configuration
    pub client: ClientConfig,
    /// Channel security for whichever side this process runs
    pub channel: ChannelSecurityConfig,
    /// Call authentication (server side)
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Upper bound on a single call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Upper bound on a TLS handshake
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50051,
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// `host:port`
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address (`host:port`)
    pub address: String,
    /// Credential attached to every call
    pub credential: CredentialConfig,
    /// Deadline for each call, including connection setup
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "localhost:50051".to_string(),
            credential: CredentialConfig::None,
            deadline: Duration::from_secs(10),
        }
    }
}

/// Call credential selection
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialConfig {
    /// No call credential
    #[default]
    None,
    /// Basic username/password
    Basic {
        /// Username
        username: String,
        /// Password (literal or `env:VAR`)
        password: String,
    },
    /// Bearer token
    Bearer {
        /// Token (literal or `env:VAR`)
        token: String,
    },
}

impl CredentialConfig {
    /// Build the credential, resolving `env:` secrets.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced environment variable is unset.
    pub fn resolve(&self) -> Result<CallCredential> {
        Ok(match self {
            Self::None => CallCredential::None,
            Self::Basic { username, password } => {
                CallCredential::basic(username.clone(), resolve_secret(password)?)
            }
            Self::Bearer { token } => CallCredential::bearer(resolve_secret(token)?),
        })
    }
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Bearer { .. } => f.debug_struct("Bearer").finish_non_exhaustive(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("RPC_AUTH_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::config_with("invalid configuration", e))
    }

    /// Name the server certificate must carry.
    ///
    /// `channel.expected_peer_name` when set, otherwise the host part of
    /// `client.address`.
    #[must_use]
    pub fn expected_peer_name(&self) -> &str {
        if let Some(name) = self.channel.expected_peer_name.as_deref() {
            return name;
        }
        let addr = self.client.address.as_str();
        match addr.rsplit_once(':') {
            Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']'),
            None => addr,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();

        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            let m = mins.parse::<u64>().map_err(serde::de::Error::custom)?;
            m.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| serde::de::Error::custom("duration overflow"))
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::auth::PolicyConfig;
    use crate::channel::ChannelMode;

    #[test]
    fn defaults_are_plaintext_on_50051() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:50051");
        assert_eq!(config.channel.mode, ChannelMode::Plaintext);
        assert_eq!(config.client.credential, CredentialConfig::None);
        assert!(config.auth.policies.is_empty());
    }

    #[test]
    fn full_yaml_round_trips_through_figment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpc-auth.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
server:
  host: 0.0.0.0
  port: 6000
  request_timeout: 250ms
  handshake_timeout: 5s
client:
  address: "catalog.internal:6000"
  deadline: 2m
  credential:
    type: bearer
    token: some-secret-token
channel:
  mode: mutual_auth
  cert: certs/client.crt
  key: certs/client.key
  ca_cert: certs/ca.crt
auth:
  policies:
    - type: static_token
      token: some-secret-token
"#
        )
        .unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();

        assert_eq!(config.server.bind_addr(), "0.0.0.0:6000");
        assert_eq!(config.server.request_timeout, Duration::from_millis(250));
        assert_eq!(config.server.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.client.deadline, Duration::from_secs(120));
        assert_eq!(config.channel.mode, ChannelMode::MutualAuth);
        assert!(matches!(
            config.auth.policies[0],
            PolicyConfig::StaticToken { .. }
        ));
        assert!(matches!(
            config.client.credential.resolve().unwrap(),
            CallCredential::Bearer(_)
        ));
        assert_eq!(config.expected_peer_name(), "catalog.internal");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/rpc-auth.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn explicit_peer_name_wins_over_address() {
        let mut config = Config::default();
        config.client.address = "10.0.0.5:50051".to_string();
        assert_eq!(config.expected_peer_name(), "10.0.0.5");

        config.channel.expected_peer_name = Some("catalog.example".to_string());
        assert_eq!(config.expected_peer_name(), "catalog.example");
    }

    #[test]
    fn ipv6_address_host_is_unbracketed() {
        let mut config = Config::default();
        config.client.address = "[::1]:50051".to_string();
        assert_eq!(config.expected_peer_name(), "::1");
    }

    #[test]
    fn credential_debug_hides_secrets() {
        let cred = CredentialConfig::Basic {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{cred:?}");
        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn durations_parse_every_unit() {
        #[derive(Deserialize)]
        struct D {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }
        let parse = |s: &str| serde_yaml::from_str::<D>(&format!("d: \"{s}\"")).unwrap().d;

        assert_eq!(parse("100ms"), Duration::from_millis(100));
        assert_eq!(parse("30s"), Duration::from_secs(30));
        assert_eq!(parse("5m"), Duration::from_secs(300));
        assert_eq!(parse("7"), Duration::from_secs(7));
    }

    #[test]
    fn huge_minute_count_is_rejected_not_wrapped() {
        #[derive(Debug, Deserialize)]
        struct D {
            #[serde(with = "humantime_serde")]
            #[allow(dead_code)]
            d: Duration,
        }
        let yaml = format!("d: \"{}m\"", u64::MAX / 2);
        let err = serde_yaml::from_str::<D>(&yaml).unwrap_err();
        assert!(err.to_string().contains("duration overflow"));
    }
}
