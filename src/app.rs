//! Wiring from [`Config`] to a running server or a ready client.

use tracing::info;

use crate::auth::interceptor_from_config;
use crate::catalog::{CatalogClient, CatalogService};
use crate::channel::{configure_client, configure_server};
use crate::config::Config;
use crate::rpc::{Pipeline, RpcClient, RpcServer};
use crate::Result;

/// Build the catalog server: channel security, auth interceptor, handler.
///
/// All credential material is loaded here, so a bad certificate or an unset
/// secret fails startup rather than the first call.
///
/// # Errors
///
/// Configuration, IO or secret resolution errors.
pub fn catalog_server(config: &Config) -> Result<RpcServer> {
    let listener = configure_server(&config.channel)?
        .with_handshake_timeout(config.server.handshake_timeout);
    let auth = interceptor_from_config(&config.auth)?;

    info!(
        mode = config.channel.mode.as_str(),
        policies = ?auth.policy_names().collect::<Vec<_>>(),
        "Catalog server configured"
    );

    let pipeline = Pipeline::new(CatalogService::new()).with_interceptor(auth);
    Ok(RpcServer::new(listener, pipeline).with_request_timeout(config.server.request_timeout))
}

/// Build a catalog client. Nothing connects until the first call.
///
/// # Errors
///
/// Configuration, IO or secret resolution errors.
pub fn catalog_client(config: &Config) -> Result<CatalogClient> {
    let dialer = configure_client(&config.channel, config.expected_peer_name())?;
    let credential = config.client.credential.resolve()?;
    let rpc = RpcClient::new(config.client.address.clone(), dialer, credential)
        .with_default_deadline(config.client.deadline);
    Ok(CatalogClient::new(rpc))
}
