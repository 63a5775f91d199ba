//! Validation policies.
//!
//! Each policy inspects an [`AuthenticatedCall`] and either admits it with a
//! [`Principal`] or rejects it. Policies are immutable after construction and
//! evaluate without side effects, so one instance serves every connection.
//!
//! | Policy | Reads | Accepts |
//! |--------|-------|---------|
//! | [`SharedSecretPolicy`] | `authorization` | `Basic base64(user:password)` matching the configured pair |
//! | [`StaticTokenPolicy`] | `authorization` | `Bearer <token>` matching the configured token |
//! | [`PeerIdentityPolicy`] | verified client certificate | identities the predicate allows |
//!
//! Secrets are compared in constant time. A malformed value is a rejection,
//! never an error.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::config::{PeerMatchConfig, PolicyConfig, resolve_secret};
use crate::Result;
use crate::channel::PeerIdentity;
use crate::rpc::Metadata;

const BASIC_PREFIX: &str = "Basic ";
const BEARER_PREFIX: &str = "Bearer ";

// ─────────────────────────────────────────────────────────────────────────────
// Call view and decision
// ─────────────────────────────────────────────────────────────────────────────

/// What a policy gets to see of an incoming call.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedCall<'a> {
    /// Call metadata; `None` when the client sent none at all.
    pub metadata: Option<&'a Metadata>,
    /// Identity negotiated by mutual TLS.
    pub peer_identity: Option<&'a PeerIdentity>,
    /// Remote address.
    pub remote: &'a str,
}

impl<'a> AuthenticatedCall<'a> {
    /// The `authorization` metadata value.
    #[must_use]
    pub fn authorization(&self) -> Option<&'a str> {
        self.metadata.and_then(Metadata::authorization)
    }
}

/// Identity a call was admitted as. Never holds a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Name of the policy that admitted the call.
    pub policy: &'static str,
    /// Username, `bearer`, or the peer's display name.
    pub subject: String,
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Call admitted.
    Admit(Principal),
    /// Call rejected.
    Reject,
}

impl Decision {
    /// Whether the call was admitted.
    #[must_use]
    pub fn is_admit(&self) -> bool {
        matches!(self, Self::Admit(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy enum
// ─────────────────────────────────────────────────────────────────────────────

/// A configured validation strategy.
#[derive(Debug, Clone)]
pub enum ValidationPolicy {
    /// Basic username/password.
    SharedSecret(SharedSecretPolicy),
    /// Bearer token.
    StaticToken(StaticTokenPolicy),
    /// Mutual-TLS peer identity.
    PeerIdentity(PeerIdentityPolicy),
}

impl ValidationPolicy {
    /// Build from configuration, resolving `env:` secrets.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Config`] when a referenced secret variable is unset.
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        Ok(match config {
            PolicyConfig::SharedSecret { username, password } => Self::SharedSecret(
                SharedSecretPolicy::new(username.clone(), &resolve_secret(password)?),
            ),
            PolicyConfig::StaticToken { token } => {
                Self::StaticToken(StaticTokenPolicy::new(resolve_secret(token)?))
            }
            PolicyConfig::PeerIdentity { rules } => {
                Self::PeerIdentity(PeerIdentityPolicy::from_rules(rules))
            }
        })
    }

    /// Policy name, as used in logs and [`Principal::policy`].
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SharedSecret(_) => SharedSecretPolicy::NAME,
            Self::StaticToken(_) => StaticTokenPolicy::NAME,
            Self::PeerIdentity(_) => PeerIdentityPolicy::NAME,
        }
    }

    /// Whether the policy looks at the `authorization` metadata value.
    #[must_use]
    pub fn reads_authorization(&self) -> bool {
        !matches!(self, Self::PeerIdentity(_))
    }

    /// Evaluate a call.
    #[must_use]
    pub fn evaluate(&self, call: &AuthenticatedCall<'_>) -> Decision {
        match self {
            Self::SharedSecret(p) => p.validate(call.authorization()),
            Self::StaticToken(p) => p.validate(call.authorization()),
            Self::PeerIdentity(p) => p.validate(call.peer_identity),
        }
    }
}

impl From<SharedSecretPolicy> for ValidationPolicy {
    fn from(p: SharedSecretPolicy) -> Self {
        Self::SharedSecret(p)
    }
}

impl From<StaticTokenPolicy> for ValidationPolicy {
    fn from(p: StaticTokenPolicy) -> Self {
        Self::StaticToken(p)
    }
}

impl From<PeerIdentityPolicy> for ValidationPolicy {
    fn from(p: PeerIdentityPolicy) -> Self {
        Self::PeerIdentity(p)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared secret
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts one username and password sent with the Basic scheme.
///
/// Only the SHA-256 of the expected password is kept.
#[derive(Clone)]
pub struct SharedSecretPolicy {
    username: String,
    password_sha256: Vec<u8>,
}

impl SharedSecretPolicy {
    /// Policy name.
    pub const NAME: &'static str = "shared_secret";

    /// Build from the expected username and password.
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        Self {
            username: username.into(),
            password_sha256: sha256(password.as_bytes()),
        }
    }

    /// Validate an `authorization` value.
    #[must_use]
    pub fn validate(&self, authorization: Option<&str>) -> Decision {
        let Some((username, password)) = authorization.and_then(decode_basic) else {
            return Decision::Reject;
        };

        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let pass_ok = sha256(password.as_bytes()).ct_eq(&self.password_sha256);

        if bool::from(user_ok & pass_ok) {
            Decision::Admit(Principal {
                policy: Self::NAME,
                subject: username,
            })
        } else {
            Decision::Reject
        }
    }
}

impl fmt::Debug for SharedSecretPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecretPolicy")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Decode a Basic `authorization` value into `(username, password)`.
///
/// The payload is split on the *first* colon, so `ad:min:x` decodes as
/// `("ad", "min:x")`. Returns `None` for another scheme, bad base64, non
/// UTF-8 payloads or a payload without a colon.
#[must_use]
pub fn decode_basic(authorization: &str) -> Option<(String, String)> {
    let payload = authorization.strip_prefix(BASIC_PREFIX)?;
    let decoded = STANDARD.decode(payload).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn sha256(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

// ─────────────────────────────────────────────────────────────────────────────
// Static token
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts one bearer token.
#[derive(Clone)]
pub struct StaticTokenPolicy {
    token: String,
}

impl StaticTokenPolicy {
    /// Policy name.
    pub const NAME: &'static str = "static_token";

    /// Build from the expected token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Validate an `authorization` value.
    ///
    /// The scheme keyword must be exactly `Bearer` followed by one space; the
    /// rest must equal the token byte for byte.
    #[must_use]
    pub fn validate(&self, authorization: Option<&str>) -> Decision {
        let Some(presented) = authorization.and_then(|v| v.strip_prefix(BEARER_PREFIX)) else {
            return Decision::Reject;
        };

        if bool::from(presented.as_bytes().ct_eq(self.token.as_bytes())) {
            Decision::Admit(Principal {
                policy: Self::NAME,
                subject: "bearer".to_string(),
            })
        } else {
            Decision::Reject
        }
    }
}

impl fmt::Debug for StaticTokenPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticTokenPolicy { .. }")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Peer identity
// ─────────────────────────────────────────────────────────────────────────────

type Predicate = dyn Fn(&PeerIdentity) -> bool + Send + Sync;

/// Accepts peers whose verified certificate satisfies a predicate.
///
/// Calls arriving without a verified identity (any mode other than mutual
/// TLS) are rejected.
#[derive(Clone)]
pub struct PeerIdentityPolicy {
    predicate: Arc<Predicate>,
    description: String,
}

impl PeerIdentityPolicy {
    /// Policy name.
    pub const NAME: &'static str = "peer_identity";

    /// Build from an arbitrary predicate.
    pub fn from_fn(predicate: impl Fn(&PeerIdentity) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
            description: "custom predicate".to_string(),
        }
    }

    /// Compile match rules. A peer is admitted when any rule matches; an
    /// empty rule list admits nobody.
    #[must_use]
    pub fn from_rules(rules: &[PeerMatchConfig]) -> Self {
        let compiled: Vec<CompiledCriteria> =
            rules.iter().map(CompiledCriteria::from_config).collect();
        let description = format!("{} rule(s)", compiled.len());
        Self {
            predicate: Arc::new(move |id: &PeerIdentity| compiled.iter().any(|c| c.matches(id))),
            description,
        }
    }

    /// Admit every verified peer.
    #[must_use]
    pub fn any_verified() -> Self {
        Self::from_rules(&[PeerMatchConfig {
            any: true,
            ..PeerMatchConfig::default()
        }])
    }

    /// Validate a negotiated identity.
    #[must_use]
    pub fn validate(&self, identity: Option<&PeerIdentity>) -> Decision {
        match identity {
            Some(id) if (self.predicate)(id) => Decision::Admit(Principal {
                policy: Self::NAME,
                subject: id.display_name.clone(),
            }),
            _ => Decision::Reject,
        }
    }
}

impl fmt::Debug for PeerIdentityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerIdentityPolicy")
            .field("predicate", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct CompiledCriteria {
    cn: Option<GlobPattern>,
    ou: Option<GlobPattern>,
    san_uri: Option<GlobPattern>,
    san_dns: Option<GlobPattern>,
    any: bool,
}

impl CompiledCriteria {
    fn from_config(cfg: &PeerMatchConfig) -> Self {
        Self {
            cn: cfg.cn.as_deref().map(GlobPattern::new),
            ou: cfg.ou.as_deref().map(GlobPattern::new),
            san_uri: cfg.san_uri.as_deref().map(GlobPattern::new),
            san_dns: cfg.san_dns.as_deref().map(GlobPattern::new),
            any: cfg.any,
        }
    }

    fn matches(&self, id: &PeerIdentity) -> bool {
        if self.any {
            return true;
        }

        let cn_ok = self
            .cn
            .as_ref()
            .is_none_or(|p| id.common_name.as_deref().is_some_and(|cn| p.matches(cn)));
        let ou_ok = self
            .ou
            .as_ref()
            .is_none_or(|p| id.organizational_unit.as_deref().is_some_and(|ou| p.matches(ou)));
        let uri_ok = self
            .san_uri
            .as_ref()
            .is_none_or(|p| id.san_uris.iter().any(|u| p.matches(u)));
        let dns_ok = self
            .san_dns
            .as_ref()
            .is_none_or(|p| id.san_dns_names.iter().any(|d| p.matches(d)));

        // An empty rule matches nothing.
        let specified = self.cn.is_some()
            || self.ou.is_some()
            || self.san_uri.is_some()
            || self.san_dns.is_some();

        specified && cn_ok && ou_ok && uri_ok && dns_ok
    }
}

/// `*`, `prefix*`, `*suffix`, `*contains*` or exact.
#[derive(Debug, Clone)]
enum GlobPattern {
    Wildcard,
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

impl GlobPattern {
    fn new(s: &str) -> Self {
        if s == "*" {
            return Self::Wildcard;
        }
        match (s.strip_prefix('*'), s.strip_suffix('*')) {
            (Some(_), Some(_)) => {
                let inner = &s[1..s.len() - 1];
                if inner.is_empty() {
                    Self::Wildcard
                } else {
                    Self::Contains(inner.to_string())
                }
            }
            (Some(suffix), None) => Self::Suffix(suffix.to_string()),
            (None, Some(prefix)) => Self::Prefix(prefix.to_string()),
            (None, None) => Self::Exact(s.to_string()),
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Exact(e) => value == e,
            Self::Prefix(p) => value.starts_with(p.as_str()),
            Self::Suffix(s) => value.ends_with(s.as_str()),
            Self::Contains(c) => value.contains(c.as_str()),
        }
    }
}
