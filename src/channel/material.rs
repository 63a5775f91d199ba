//! Credential material: certificates, keys, CA bundles, tokens and passwords.
//!
//! All certificate and key files are expected in **PEM format**. Reading a
//! file that does not exist is an [`Error::Io`]; a file that exists but holds
//! no usable PEM block is an [`Error::Config`].
//!
//! Secret-bearing types never print their secrets through `Debug`.

use std::fmt;
use std::fs;

use rustls::RootCertStore;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::{Error, Result};

/// Any piece of credential material the negotiator or a provider can own.
#[derive(Debug)]
pub enum CredentialMaterial {
    /// Certificate chain plus private key.
    X509KeyPair(X509KeyPair),
    /// Trusted CA certificates.
    TrustBundle(TrustBundle),
    /// Opaque bearer token.
    BearerToken(BearerToken),
    /// Username and password.
    BasicCredentials(BasicCredentials),
}

impl CredentialMaterial {
    /// Short kind label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::X509KeyPair(_) => "x509_key_pair",
            Self::TrustBundle(_) => "trust_bundle",
            Self::BearerToken(_) => "bearer_token",
            Self::BasicCredentials(_) => "basic_credentials",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// X.509 key pair
// ─────────────────────────────────────────────────────────────────────────────

/// A certificate chain (leaf first) and its private key.
pub struct X509KeyPair {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl X509KeyPair {
    /// Load a key pair from PEM files.
    ///
    /// Whether the key matches the leaf certificate is checked when the pair
    /// is handed to rustls, see [`crate::channel::configure_server`].
    pub fn load(cert_path: &str, key_path: &str) -> Result<Self> {
        let chain = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;
        Ok(Self { chain, key })
    }

    /// Build from in-memory PEM.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let chain = parse_certs(cert_pem, "<memory>")?;
        let key = parse_private_key(key_pem, "<memory>")?;
        Ok(Self { chain, key })
    }

    /// Certificate chain, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Split into the parts rustls consumes.
    #[must_use]
    pub fn into_parts(self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (self.chain, self.key)
    }
}

impl fmt::Debug for X509KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509KeyPair")
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trust bundle
// ─────────────────────────────────────────────────────────────────────────────

/// Set of trusted CA certificates.
#[derive(Debug, Clone)]
pub struct TrustBundle {
    certs: Vec<CertificateDer<'static>>,
}

impl TrustBundle {
    /// Load every certificate of a PEM bundle.
    pub fn load(path: &str) -> Result<Self> {
        Ok(Self {
            certs: load_certs(path)?,
        })
    }

    /// Build from in-memory PEM.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Ok(Self {
            certs: parse_certs(pem, "<memory>")?,
        })
    }

    /// Number of CA certificates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Whether the bundle is empty (never true for a loaded bundle).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Build a rustls root store.
    pub fn root_store(&self) -> Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();
        for cert in &self.certs {
            root_store
                .add(cert.clone())
                .map_err(|e| Error::config_with("failed to add CA cert to trust store", e))?;
        }
        Ok(root_store)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Call-level secrets
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Username and password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    username: String,
    password: String,
}

impl BasicCredentials {
    /// Build a pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The raw password.
    #[must_use]
    pub fn expose_password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    parse_certs(&pem_data, path)
}

/// Load the first private key from a PEM file.
///
/// Supports PKCS#1 (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`) and SEC1 EC keys.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    parse_private_key(&pem_data, path)
}

fn parse_certs(pem: &[u8], origin: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config_with(format!("failed to parse certs from '{origin}'"), e))?;

    if certs.is_empty() {
        return Err(Error::config(format!("no certificates found in '{origin}'")));
    }

    Ok(certs)
}

fn parse_private_key(pem: &[u8], origin: &str) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| Error::config_with(format!("no usable private key in '{origin}'"), e))
}

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| Error::Io {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use rcgen::{CertificateParams, KeyPair};

    fn self_signed(cn: &str) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec![cn.to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        (cert.pem(), key.serialize_pem())
    }

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn key_pair_loads_from_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = self_signed("server.local");
        let cert_path = write(&dir, "server.crt", &cert);
        let key_path = write(&dir, "server.key", &key);

        let pair = X509KeyPair::load(&cert_path, &key_path).unwrap();
        assert_eq!(pair.chain().len(), 1);
    }

    #[test]
    fn bundle_accepts_concatenated_certificates() {
        let (first, _) = self_signed("ca-one");
        let (second, _) = self_signed("ca-two");
        let bundle = TrustBundle::from_pem(format!("{first}{second}").as_bytes()).unwrap();

        assert_eq!(bundle.len(), 2);
        assert!(bundle.root_store().is_ok());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_certs("/nonexistent/path/ca.crt").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/path/ca.crt"));
    }

    #[test]
    fn empty_pem_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "empty.crt", "");
        assert!(matches!(load_certs(&path), Err(Error::Config { .. })));
    }

    #[test]
    fn garbage_pem_is_a_config_error() {
        let pem = b"-----BEGIN CERTIFICATE-----\n!!!not base64!!!\n-----END CERTIFICATE-----\n";
        assert!(matches!(
            TrustBundle::from_pem(pem),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn certificate_file_holds_no_private_key() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = self_signed("cert-only");
        let path = write(&dir, "cert_only.pem", &cert);

        assert!(matches!(load_private_key(&path), Err(Error::Config { .. })));
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let basic = BasicCredentials::new("admin", "hunter2");
        let token = BearerToken::new("some-secret-token");

        let printed = format!("{basic:?} {token:?}");
        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("some-secret-token"));
    }

    #[test]
    fn material_reports_its_kind() {
        let material = CredentialMaterial::BearerToken(BearerToken::new("t"));
        assert_eq!(material.kind(), "bearer_token");
    }
}
