//! Channel security negotiation.
//!
//! [`configure_server`] and [`configure_client`] load credential material once
//! and return a [`SecureListener`] / [`SecureDialer`]. Neither opens a socket:
//! the listener secures streams the server accepts, the dialer connects when
//! the client makes its first call.
//!
//! TLS 1.3 is the only protocol version offered, with the aws-lc-rs provider.
//! In `MutualAuth` mode a client that does not present a certificate chaining
//! to the trust bundle fails the handshake and never reaches the server's
//! call pipeline.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ServerConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

use super::config::{ChannelMode, ChannelSecurityConfig};
use super::identity::PeerIdentity;
use super::material::{TrustBundle, X509KeyPair};
use crate::{Error, Result};

/// Default bound on a server-side TLS handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte stream a secured channel runs over.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncIo for T {}

/// Boxed [`AsyncIo`] so plaintext and TLS streams share one type.
pub type BoxedIo = Box<dyn AsyncIo>;

/// An established channel.
pub struct SecuredStream {
    /// The (possibly TLS-wrapped) stream.
    pub io: BoxedIo,
    /// Security mode the channel was negotiated under.
    pub mode: ChannelMode,
    /// Verified identity of the client; only set for server-side `MutualAuth`.
    pub peer_identity: Option<PeerIdentity>,
    /// Remote address, for logs.
    pub remote: String,
}

impl std::fmt::Debug for SecuredStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecuredStream")
            .field("mode", &self.mode)
            .field("peer_identity", &self.peer_identity)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server side
// ─────────────────────────────────────────────────────────────────────────────

/// Secures accepted TCP streams according to the server's channel config.
#[derive(Clone)]
pub struct SecureListener {
    mode: ChannelMode,
    acceptor: Option<TlsAcceptor>,
    handshake_timeout: Duration,
}

impl SecureListener {
    /// Negotiated mode.
    #[must_use]
    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    /// Override the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Run the server half of the handshake on an accepted stream.
    ///
    /// Plaintext listeners return the stream untouched. TLS listeners either
    /// complete the handshake within the timeout or fail with
    /// [`Error::Handshake`]; the caller drops the connection.
    pub async fn secure(&self, stream: TcpStream, remote: SocketAddr) -> Result<SecuredStream> {
        let remote = remote.to_string();
        let Some(ref acceptor) = self.acceptor else {
            return Ok(SecuredStream {
                io: Box::new(stream),
                mode: self.mode,
                peer_identity: None,
                remote,
            });
        };

        let tls = tokio::time::timeout(self.handshake_timeout, acceptor.accept(stream))
            .await
            .map_err(|_| Error::Handshake {
                peer: remote.clone(),
                source: io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"),
            })?
            .map_err(|source| Error::Handshake {
                peer: remote.clone(),
                source,
            })?;

        let peer_identity = if self.mode == ChannelMode::MutualAuth {
            let (_, session) = tls.get_ref();
            session
                .peer_certificates()
                .and_then(|chain| chain.first())
                .map(|leaf| PeerIdentity::from_der(leaf.as_ref()))
                .transpose()?
        } else {
            None
        };

        debug!(
            remote = %remote,
            mode = self.mode.as_str(),
            peer = peer_identity.as_ref().map_or("-", |p| p.display_name.as_str()),
            "TLS handshake complete"
        );

        Ok(SecuredStream {
            io: Box::new(tls),
            mode: self.mode,
            peer_identity,
            remote,
        })
    }
}

/// Build the server half of the channel.
///
/// # Errors
///
/// [`Error::Config`] when the config violates the mode's invariants, a PEM
/// file holds nothing usable, or the private key does not match the
/// certificate; [`Error::Io`] when a file cannot be read.
pub fn configure_server(config: &ChannelSecurityConfig) -> Result<SecureListener> {
    config.validate_server()?;

    let acceptor = match config.mode {
        ChannelMode::Plaintext => None,
        ChannelMode::ServerAuthOnly | ChannelMode::MutualAuth => {
            let tls = build_server_tls(config)?;
            Some(TlsAcceptor::from(Arc::new(tls)))
        }
    };

    debug!(
        mode = config.mode.as_str(),
        cert = config.cert.as_deref().unwrap_or("-"),
        ca_cert = config.ca_cert.as_deref().unwrap_or("-"),
        "Server channel configured"
    );

    Ok(SecureListener {
        mode: config.mode,
        acceptor,
        handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
    })
}

fn build_server_tls(config: &ChannelSecurityConfig) -> Result<ServerConfig> {
    let (cert_path, key_path) = config
        .identity_paths()
        .ok_or_else(|| Error::config("server identity missing"))?;
    let identity = X509KeyPair::load(cert_path, key_path)?;
    let provider = crypto_provider();

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::config_with("TLS 1.3 unavailable in crypto provider", e))?;

    let builder = if config.mode == ChannelMode::MutualAuth {
        let bundle = load_trust_bundle(config)?;
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(bundle.root_store()?), provider)
                .build()
                .map_err(|e| Error::config_with("failed to build client verifier", e))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    let (chain, key) = identity.into_parts();
    builder
        .with_single_cert(chain, key)
        .map_err(|e| Error::config_with("server certificate rejected (cert/key mismatch?)", e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Client side
// ─────────────────────────────────────────────────────────────────────────────

/// Opens channels to one server according to the client's channel config.
#[derive(Clone)]
pub struct SecureDialer {
    mode: ChannelMode,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl SecureDialer {
    /// Negotiated mode.
    #[must_use]
    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    /// Connect to `addr` and run the client half of the handshake.
    ///
    /// The server certificate must chain to the trust bundle *and* carry the
    /// expected peer name; otherwise the handshake fails with
    /// [`Error::Handshake`].
    pub async fn connect(&self, addr: &str) -> Result<SecuredStream> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::transport(format!("cannot connect to {addr}"), e))?;
        tcp.set_nodelay(true)
            .map_err(|e| Error::transport("cannot set TCP_NODELAY", e))?;

        let io: BoxedIo = match self.tls {
            None => Box::new(tcp),
            Some((ref connector, ref server_name)) => {
                let tls = connector
                    .connect(server_name.clone(), tcp)
                    .await
                    .map_err(|source| Error::Handshake {
                        peer: addr.to_string(),
                        source,
                    })?;
                debug!(addr = %addr, mode = self.mode.as_str(), "Client channel established");
                Box::new(tls)
            }
        };

        Ok(SecuredStream {
            io,
            mode: self.mode,
            peer_identity: None,
            remote: addr.to_string(),
        })
    }
}

/// Build the client half of the channel.
///
/// `expected_peer_name` is the DNS name or IP the server certificate must be
/// issued for. It is ignored in `Plaintext` mode.
///
/// # Errors
///
/// Same conditions as [`configure_server`], plus an invalid peer name.
pub fn configure_client(
    config: &ChannelSecurityConfig,
    expected_peer_name: &str,
) -> Result<SecureDialer> {
    config.validate_client()?;

    let tls = match config.mode {
        ChannelMode::Plaintext => None,
        ChannelMode::ServerAuthOnly | ChannelMode::MutualAuth => {
            let server_name = ServerName::try_from(expected_peer_name.to_owned()).map_err(|e| {
                Error::config_with(format!("invalid expected peer name '{expected_peer_name}'"), e)
            })?;
            let tls = build_client_tls(config)?;
            Some((TlsConnector::from(Arc::new(tls)), server_name))
        }
    };

    debug!(
        mode = config.mode.as_str(),
        expected_peer_name = %expected_peer_name,
        "Client channel configured"
    );

    Ok(SecureDialer {
        mode: config.mode,
        tls,
    })
}

fn build_client_tls(config: &ChannelSecurityConfig) -> Result<ClientConfig> {
    let bundle = load_trust_bundle(config)?;

    let builder = ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::config_with("TLS 1.3 unavailable in crypto provider", e))?
        .with_root_certificates(bundle.root_store()?);

    if config.mode == ChannelMode::MutualAuth {
        let (cert_path, key_path) = config
            .identity_paths()
            .ok_or_else(|| Error::config("client identity missing"))?;
        let (chain, key) = X509KeyPair::load(cert_path, key_path)?.into_parts();
        builder
            .with_client_auth_cert(chain, key)
            .map_err(|e| Error::config_with("client certificate rejected (cert/key mismatch?)", e))
    } else {
        Ok(builder.with_no_client_auth())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn load_trust_bundle(config: &ChannelSecurityConfig) -> Result<TrustBundle> {
    let path = config
        .ca_cert
        .as_deref()
        .ok_or_else(|| Error::config("trust bundle missing"))?;
    TrustBundle::load(path)
}
