//! rpc-auth Library
//!
//! Pluggable channel security and call authentication for a small RPC
//! service, with a product catalog as the business logic behind it.
//!
//! # Layers
//!
//! - **Channel security** ([`channel`]): plaintext, one-way TLS or mutual TLS,
//!   negotiated before any call runs. Peers failing mutual verification are
//!   dropped at the handshake.
//! - **Call credentials** ([`credentials`]): Basic or Bearer `authorization`
//!   metadata, refused over plaintext channels.
//! - **Server authentication** ([`auth`]): an interceptor consulting shared
//!   secret, static token and peer identity policies before the handler.
//! - **Transport** ([`rpc`]): line-delimited JSON envelope over TCP.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod auth;
pub mod catalog;
pub mod channel;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod rpc;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. `format` is `json` or text
/// (anything else).
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::config_with("failed to install tracing subscriber", e))
}
