//! Channel-level security.
//!
//! Loads credential material and negotiates transport encryption (one-way or
//! mutual TLS) before any call-level logic runs. Call credentials live in
//! [`crate::credentials`] and compose with whatever mode is chosen here.

pub mod config;
pub mod identity;
pub mod material;
pub mod negotiator;

pub use config::{ChannelMode, ChannelSecurityConfig};
pub use identity::PeerIdentity;
pub use material::{BasicCredentials, BearerToken, CredentialMaterial, TrustBundle, X509KeyPair};
pub use negotiator::{
    AsyncIo, BoxedIo, DEFAULT_HANDSHAKE_TIMEOUT, SecureDialer, SecureListener, SecuredStream,
    configure_client, configure_server,
};
