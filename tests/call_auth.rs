//! Call credentials and the server auth interceptor, end to end.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rpc_auth::Error;
use rpc_auth::auth::{
    AuthInterceptor, PeerIdentityPolicy, SharedSecretPolicy, StaticTokenPolicy, ValidationPolicy,
};
use rpc_auth::catalog::{ADD_PRODUCT, CatalogClient, GET_PRODUCT, Product};
use rpc_auth::channel::{
    ChannelSecurityConfig, SecureDialer, SecureListener, configure_client, configure_server,
};
use rpc_auth::credentials::CallCredential;
use rpc_auth::rpc::{Pipeline, RpcClient, StatusCode};
use serde_json::json;

use common::{CountingCatalog, Pki, Running};

const DEADLINE: Duration = Duration::from_secs(5);

/// One-way TLS server guarded by `policies`; returns the handler call count.
async fn tls_server(
    pki: &Pki,
    policies: Vec<ValidationPolicy>,
) -> (Running, Arc<std::sync::atomic::AtomicUsize>) {
    let listener: SecureListener =
        configure_server(&ChannelSecurityConfig::server_auth(&pki.server.cert, &pki.server.key))
            .unwrap();
    let handler = CountingCatalog::default();
    let calls = Arc::clone(&handler.calls);
    let pipeline =
        Pipeline::new(handler).with_interceptor(AuthInterceptor::from_policies(policies));
    (common::start(listener, pipeline).await, calls)
}

fn tls_dialer(pki: &Pki) -> SecureDialer {
    configure_client(&ChannelSecurityConfig::server_auth_client(&pki.ca), "localhost").unwrap()
}

fn client(running: &Running, dialer: SecureDialer, credential: CallCredential) -> RpcClient {
    RpcClient::new(running.addr.to_string(), dialer, credential).with_default_deadline(DEADLINE)
}

#[tokio::test]
async fn basic_credentials_over_tls_reach_the_handler() {
    let pki = Pki::generate();
    let (server, calls) =
        tls_server(&pki, vec![SharedSecretPolicy::new("admin", "admin").into()]).await;

    let catalog = CatalogClient::new(client(
        &server,
        tls_dialer(&pki),
        CallCredential::basic("admin", "admin"),
    ));

    let id = catalog
        .add_product(&Product::new(
            "Sumsung S10",
            "Samsung Galaxy S10 is the latest smart phone",
            700.0,
        ))
        .await
        .unwrap();
    let product = catalog.get_product(&id).await.unwrap();

    assert_eq!(product.id, id);
    assert_eq!(product.name, "Sumsung S10");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn bearer_token_over_tls_reaches_the_handler() {
    let pki = Pki::generate();
    let (server, calls) =
        tls_server(&pki, vec![StaticTokenPolicy::new("some-secret-token").into()]).await;

    let rpc = client(
        &server,
        tls_dialer(&pki),
        CallCredential::bearer("some-secret-token"),
    );
    let result = rpc
        .call(ADD_PRODUCT, json!({"name": "Pixel", "price": 499.0}))
        .await
        .unwrap();

    assert!(result["value"].is_string());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wrong_password_is_unauthenticated() {
    let pki = Pki::generate();
    let (server, calls) =
        tls_server(&pki, vec![SharedSecretPolicy::new("admin", "admin").into()]).await;

    let rpc = client(&server, tls_dialer(&pki), CallCredential::basic("admin", "admiN"));
    let err = rpc
        .call(GET_PRODUCT, json!({"value": "anything"}))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), StatusCode::Unauthenticated);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn wrong_scheme_is_unauthenticated() {
    let pki = Pki::generate();
    let (server, calls) =
        tls_server(&pki, vec![SharedSecretPolicy::new("admin", "admin").into()]).await;

    let rpc = client(&server, tls_dialer(&pki), CallCredential::bearer("admin"));
    let err = rpc
        .call(GET_PRODUCT, json!({"value": "anything"}))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), StatusCode::Unauthenticated);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_authorization_is_invalid_argument() {
    let pki = Pki::generate();
    let (server, calls) =
        tls_server(&pki, vec![StaticTokenPolicy::new("some-secret-token").into()]).await;

    let rpc = client(&server, tls_dialer(&pki), CallCredential::None);
    let err = rpc
        .call(GET_PRODUCT, json!({"value": "anything"}))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), StatusCode::InvalidArgument);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn either_policy_may_admit() {
    let pki = Pki::generate();
    let (server, calls) = tls_server(
        &pki,
        vec![
            SharedSecretPolicy::new("admin", "admin").into(),
            StaticTokenPolicy::new("some-secret-token").into(),
        ],
    )
    .await;

    let basic = client(&server, tls_dialer(&pki), CallCredential::basic("admin", "admin"));
    let bearer = client(
        &server,
        tls_dialer(&pki),
        CallCredential::bearer("some-secret-token"),
    );

    basic
        .call(ADD_PRODUCT, json!({"name": "a", "price": 1.0}))
        .await
        .unwrap();
    bearer
        .call(ADD_PRODUCT, json!({"name": "b", "price": 2.0}))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn secret_over_plaintext_never_leaves_the_client() {
    let listener = configure_server(&ChannelSecurityConfig::plaintext()).unwrap();
    let handler = CountingCatalog::default();
    let calls = Arc::clone(&handler.calls);
    let pipeline = Pipeline::new(handler)
        .with_interceptor(AuthInterceptor::new(StaticTokenPolicy::new("some-secret-token")));
    let server = common::start(listener, pipeline).await;

    let dialer = configure_client(&ChannelSecurityConfig::plaintext(), "localhost").unwrap();
    let rpc = client(&server, dialer, CallCredential::bearer("some-secret-token"));

    let err = rpc
        .call(ADD_PRODUCT, json!({"name": "a", "price": 1.0}))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SecurityViolation(_)), "got {err:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn peer_identity_policy_sees_the_client_certificate() {
    let pki = Pki::generate();
    let listener = configure_server(&ChannelSecurityConfig::mutual_auth(
        &pki.server.cert,
        &pki.server.key,
        &pki.ca,
    ))
    .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let policy = PeerIdentityPolicy::from_fn(move |peer| {
        recorder.lock().unwrap().push(peer.display_name.clone());
        peer.organizational_unit.as_deref() == Some("catalog")
    });

    let handler = CountingCatalog::default();
    let calls = Arc::clone(&handler.calls);
    let pipeline = Pipeline::new(handler).with_interceptor(AuthInterceptor::new(policy));
    let server = common::start(listener, pipeline).await;

    let dialer = configure_client(
        &ChannelSecurityConfig::mutual_auth(&pki.client.cert, &pki.client.key, &pki.ca),
        "localhost",
    )
    .unwrap();
    let rpc = client(&server, dialer, CallCredential::None);

    rpc.call(ADD_PRODUCT, json!({"name": "a", "price": 1.0}))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["inventory-svc".to_string()]);
}

#[tokio::test]
async fn unknown_product_is_not_found() {
    let pki = Pki::generate();
    let (server, _) =
        tls_server(&pki, vec![StaticTokenPolicy::new("some-secret-token").into()]).await;

    let catalog = CatalogClient::new(client(
        &server,
        tls_dialer(&pki),
        CallCredential::bearer("some-secret-token"),
    ));

    let err = catalog.get_product("no-such-id").await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NotFound);
}
