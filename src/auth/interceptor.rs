//! Server authentication interceptor.
//!
//! Gates every call before business logic:
//!
//! 1. No metadata at all → [`Error::MissingCredentials`].
//! 2. Each configured policy is consulted in order; the first that admits
//!    wins and its [`Principal`] is attached to the call.
//! 3. If none admits: a missing `authorization` value (when some policy
//!    reads it) is [`Error::MissingCredentials`], anything else is
//!    [`Error::InvalidCredentials`].
//!
//! Rejected calls never reach the next stage.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::policy::{AuthenticatedCall, Decision, Principal, ValidationPolicy};
use crate::rpc::{IncomingCall, Interceptor, Next};
use crate::{Error, Result};

/// Interceptor that authenticates calls against one or more policies.
#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    policies: Vec<ValidationPolicy>,
    reads_authorization: bool,
}

impl AuthInterceptor {
    /// Interceptor with a single policy.
    pub fn new(policy: impl Into<ValidationPolicy>) -> Self {
        Self::from_policies(vec![policy.into()])
    }

    /// Interceptor consulting `policies` in order.
    ///
    /// An empty list rejects every call.
    #[must_use]
    pub fn from_policies(policies: Vec<ValidationPolicy>) -> Self {
        let reads_authorization = policies.iter().any(ValidationPolicy::reads_authorization);
        Self {
            policies,
            reads_authorization,
        }
    }

    /// Configured policy names, in evaluation order.
    pub fn policy_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.policies.iter().map(ValidationPolicy::name)
    }

    /// Decide on a call without running anything downstream.
    ///
    /// # Errors
    ///
    /// [`Error::MissingCredentials`] or [`Error::InvalidCredentials`].
    pub fn authenticate(&self, call: &IncomingCall) -> Result<Principal> {
        let Some(metadata) = call.metadata.as_ref() else {
            warn!(
                method = %call.method,
                remote = %call.remote,
                reason = "no metadata",
                "Rejected call"
            );
            return Err(Error::MissingCredentials);
        };

        let view = AuthenticatedCall {
            metadata: Some(metadata),
            peer_identity: call.peer_identity.as_deref(),
            remote: &call.remote,
        };

        for policy in &self.policies {
            if let Decision::Admit(principal) = policy.evaluate(&view) {
                debug!(
                    method = %call.method,
                    remote = %call.remote,
                    policy = principal.policy,
                    subject = %principal.subject,
                    "Admitted call"
                );
                return Ok(principal);
            }
        }

        let authorization = view.authorization();
        if authorization.is_none() && self.reads_authorization {
            warn!(
                method = %call.method,
                remote = %call.remote,
                reason = "no authorization",
                "Rejected call"
            );
            return Err(Error::MissingCredentials);
        }

        warn!(
            method = %call.method,
            remote = %call.remote,
            scheme = scheme_keyword(authorization),
            peer = call.peer_identity.as_ref().map_or("-", |p| p.display_name.as_str()),
            "Rejected call: invalid credentials"
        );
        Err(Error::InvalidCredentials)
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn intercept(&self, mut call: IncomingCall, next: Next<'_>) -> Result<Value> {
        let principal = self.authenticate(&call)?;
        call.principal = Some(principal);
        next.run(call).await
    }
}

/// Scheme keyword for logs. Anything unrecognised is reported as `other` so
/// a token sent without a scheme never lands in a log line.
fn scheme_keyword(authorization: Option<&str>) -> &'static str {
    match authorization {
        None => "-",
        Some(v) if v.starts_with("Basic ") => "Basic",
        Some(v) if v.starts_with("Bearer ") => "Bearer",
        Some(_) => "other",
    }
}
