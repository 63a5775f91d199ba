//! Server-side call authentication.
//!
//! [`AuthInterceptor`] sits in front of the handler and consults one or more
//! [`ValidationPolicy`] values built from [`AuthConfig`].

pub mod config;
pub mod interceptor;
pub mod policy;

pub use config::{AuthConfig, PeerMatchConfig, PolicyConfig, resolve_secret};
pub use interceptor::AuthInterceptor;
pub use policy::{
    AuthenticatedCall, Decision, PeerIdentityPolicy, Principal, SharedSecretPolicy,
    StaticTokenPolicy, ValidationPolicy, decode_basic,
};

use crate::Result;

/// Build the interceptor for a configuration.
///
/// # Errors
///
/// [`crate::Error::Config`] when no policy is configured or a secret cannot
/// be resolved.
pub fn interceptor_from_config(config: &AuthConfig) -> Result<AuthInterceptor> {
    if config.policies.is_empty() {
        return Err(crate::Error::config(
            "auth.policies is empty; at least one validation policy is required",
        ));
    }
    let policies = config
        .policies
        .iter()
        .map(ValidationPolicy::from_config)
        .collect::<Result<Vec<_>>>()?;
    Ok(AuthInterceptor::from_policies(policies))
}
