//! Client-side call credentials.
//!
//! A [`CallCredential`] writes the `authorization` metadata entry for each
//! call. Credentials that carry a secret refuse to attach over a plaintext
//! channel: the call fails with [`Error::SecurityViolation`] before anything
//! is written to the network.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::warn;

use crate::channel::{BasicCredentials, BearerToken, ChannelMode, CredentialMaterial};
use crate::rpc::{AUTHORIZATION, Metadata};
use crate::{Error, Result};

/// Something that adds authentication metadata to outgoing calls.
///
/// Implementations are stateless and shared across concurrent calls.
pub trait CallCredentials: Send + Sync {
    /// Whether this credential may only travel over an encrypted channel.
    fn requires_secure_channel(&self) -> bool;

    /// Scheme label for logs.
    fn scheme(&self) -> &'static str;

    /// Add metadata for one call.
    ///
    /// # Errors
    ///
    /// [`Error::SecurityViolation`] when the credential requires a secure
    /// channel and `mode` is plaintext.
    fn attach(&self, metadata: &mut Metadata, mode: ChannelMode) -> Result<()>;
}

/// The built-in call credentials.
#[derive(Debug, Clone, Default)]
pub enum CallCredential {
    /// Adds nothing.
    #[default]
    None,
    /// `authorization: Basic base64(username:password)`
    Basic(BasicCredentials),
    /// `authorization: Bearer <token>`
    Bearer(BearerToken),
}

impl CallCredential {
    /// Basic credential from a username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic(BasicCredentials::new(username, password))
    }

    /// Bearer credential from a token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(BearerToken::new(token))
    }

    /// The `authorization` value this credential produces, if any.
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Basic(creds) => Some(encode_basic(creds.username(), creds.expose_password())),
            Self::Bearer(token) => Some(format!("Bearer {}", token.expose())),
        }
    }
}

impl CallCredentials for CallCredential {
    fn requires_secure_channel(&self) -> bool {
        !matches!(self, Self::None)
    }

    fn scheme(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic(_) => "basic",
            Self::Bearer(_) => "bearer",
        }
    }

    fn attach(&self, metadata: &mut Metadata, mode: ChannelMode) -> Result<()> {
        if self.requires_secure_channel() && !mode.is_secure() {
            warn!(
                scheme = self.scheme(),
                mode = mode.as_str(),
                "Refusing to send credential over an insecure channel"
            );
            return Err(Error::SecurityViolation(format!(
                "{} credential requires a secure channel, channel is {}",
                self.scheme(),
                mode.as_str()
            )));
        }

        if let Some(value) = self.header_value() {
            metadata.insert(AUTHORIZATION, value);
        }
        Ok(())
    }
}

impl TryFrom<CredentialMaterial> for CallCredential {
    type Error = Error;

    fn try_from(material: CredentialMaterial) -> Result<Self> {
        match material {
            CredentialMaterial::BasicCredentials(creds) => Ok(Self::Basic(creds)),
            CredentialMaterial::BearerToken(token) => Ok(Self::Bearer(token)),
            other => Err(Error::config(format!(
                "{} is channel material, not a call credential",
                other.kind()
            ))),
        }
    }
}

/// Ordered list of credentials attached to every call.
///
/// All credentials attach in order; the first failure aborts the call and
/// leaves no partial metadata behind.
#[derive(Clone, Default)]
pub struct CredentialChain {
    providers: Vec<std::sync::Arc<dyn CallCredentials>>,
}

impl CredentialChain {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a credential.
    #[must_use]
    pub fn with(mut self, provider: impl CallCredentials + 'static) -> Self {
        self.providers.push(std::sync::Arc::new(provider));
        self
    }

    /// Number of credentials in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Build the metadata for one call.
    ///
    /// # Errors
    ///
    /// The first [`Error::SecurityViolation`] raised by a member.
    pub fn metadata_for(&self, mode: ChannelMode) -> Result<Metadata> {
        let mut metadata = Metadata::new();
        for provider in &self.providers {
            provider.attach(&mut metadata, mode)?;
        }
        Ok(metadata)
    }
}

impl std::fmt::Debug for CredentialChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.scheme()))
            .finish()
    }
}

impl From<CallCredential> for CredentialChain {
    fn from(credential: CallCredential) -> Self {
        Self::new().with(credential)
    }
}

fn encode_basic(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
