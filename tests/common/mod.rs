//! Shared fixtures: a throwaway PKI on disk and in-process servers.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::oneshot;

use rpc_auth::Result;
use rpc_auth::catalog::CatalogService;
use rpc_auth::channel::SecureListener;
use rpc_auth::rpc::{IncomingCall, Interceptor, Next, Pipeline, RpcHandler, RpcServer};

/// Paths of one PEM certificate and its key.
#[derive(Debug, Clone)]
pub struct Identity {
    pub cert: String,
    pub key: String,
}

/// A CA plus the leaves the tests need, written under a temp dir.
pub struct Pki {
    _dir: TempDir,
    /// Trusted CA bundle
    pub ca: String,
    /// Server leaf for `localhost`, signed by the CA
    pub server: Identity,
    /// Client leaf (CN `inventory-svc`, OU `catalog`), signed by the CA
    pub client: Identity,
    /// Client leaf signed by an unrelated CA
    pub rogue_client: Identity,
}

struct Issuer {
    cert: Certificate,
    key: KeyPair,
}

impl Pki {
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let ca = issuer("Catalog Test CA");
        let rogue_ca = issuer("Rogue CA");

        let ca_path = write(&dir, "ca.crt", &ca.cert.pem());
        let server = leaf(
            &dir,
            "server",
            &ca,
            "localhost",
            None,
            ExtendedKeyUsagePurpose::ServerAuth,
        );
        let client = leaf(
            &dir,
            "client",
            &ca,
            "inventory-svc",
            Some("catalog"),
            ExtendedKeyUsagePurpose::ClientAuth,
        );
        let rogue_client = leaf(
            &dir,
            "rogue",
            &rogue_ca,
            "inventory-svc",
            Some("catalog"),
            ExtendedKeyUsagePurpose::ClientAuth,
        );

        Self {
            _dir: dir,
            ca: ca_path,
            server,
            client,
            rogue_client,
        }
    }

    /// Write arbitrary contents next to the generated files.
    pub fn write(&self, name: &str, contents: &str) -> String {
        write(&self._dir, name, contents)
    }
}

fn issuer(cn: &str) -> Issuer {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let cert = params.self_signed(&key).unwrap();
    Issuer { cert, key }
}

fn leaf(
    dir: &TempDir,
    stem: &str,
    issuer: &Issuer,
    cn: &str,
    ou: Option<&str>,
    usage: ExtendedKeyUsagePurpose,
) -> Identity {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![cn.to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    if let Some(ou) = ou {
        dn.push(DnType::OrganizationalUnitName, ou);
    }
    params.distinguished_name = dn;
    params.extended_key_usages = vec![usage];
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();

    Identity {
        cert: write(dir, &format!("{stem}.crt"), &cert.pem()),
        key: write(dir, &format!("{stem}.key"), &key.serialize_pem()),
    }
}

fn write(dir: &TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

/// Counts every call that reaches it, then passes the call on.
#[derive(Clone, Default)]
pub struct CallCounter {
    pub count: Arc<AtomicUsize>,
}

impl CallCounter {
    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Interceptor for CallCounter {
    async fn intercept(&self, call: IncomingCall, next: Next<'_>) -> Result<Value> {
        self.count.fetch_add(1, Ordering::SeqCst);
        next.run(call).await
    }
}

/// Catalog handler that counts invocations.
#[derive(Default)]
pub struct CountingCatalog {
    inner: CatalogService,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl RpcHandler for CountingCatalog {
    async fn handle(&self, call: IncomingCall) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.handle(call).await
    }
}

/// A server running on an ephemeral port; stops when dropped.
pub struct Running {
    pub addr: SocketAddr,
    _stop: oneshot::Sender<()>,
}

pub async fn start(listener: SecureListener, pipeline: Pipeline) -> Running {
    serve(RpcServer::new(listener, pipeline)).await
}

pub async fn serve(server: RpcServer) -> Running {
    let bound = server
        .bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = bound.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(bound.serve_with_shutdown(async move {
        let _ = stopped.await;
    }));
    Running { addr, _stop: stop }
}
