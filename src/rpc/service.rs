//! Server-side call pipeline: handler and interceptor traits.
//!
//! A call flows through an ordered list of [`Interceptor`]s and ends in an
//! [`RpcHandler`]. Each interceptor receives a [`Next`] continuation and
//! decides whether to run it; skipping it rejects the call before anything
//! downstream executes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::auth::Principal;
use crate::channel::PeerIdentity;

use super::Metadata;

/// A call as seen by interceptors and the handler.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    /// Fully qualified method name.
    pub method: String,
    /// Call metadata; `None` when the client sent no metadata at all.
    pub metadata: Option<Metadata>,
    /// Call parameters (`null` when absent).
    pub params: Value,
    /// Verified client identity, only set on mutual-TLS channels.
    pub peer_identity: Option<Arc<PeerIdentity>>,
    /// Remote address.
    pub remote: String,
    /// Identity the call was admitted as; set by the auth interceptor.
    pub principal: Option<Principal>,
}

impl IncomingCall {
    /// Call with no metadata, identity or principal.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            metadata: None,
            params,
            peer_identity: None,
            remote: String::new(),
            principal: None,
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attach a verified peer identity.
    #[must_use]
    pub fn with_peer_identity(mut self, identity: PeerIdentity) -> Self {
        self.peer_identity = Some(Arc::new(identity));
        self
    }

    /// Set the remote address.
    #[must_use]
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }
}

/// Business logic behind the pipeline.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handle an admitted call.
    async fn handle(&self, call: IncomingCall) -> Result<Value>;
}

/// A stage that runs before the handler.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Inspect `call` and either return early or continue with `next`.
    async fn intercept(&self, call: IncomingCall, next: Next<'_>) -> Result<Value>;
}

/// The remainder of the pipeline after the current interceptor.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn RpcHandler,
}

impl<'a> Next<'a> {
    /// Pipeline made of `interceptors` followed by `handler`.
    #[must_use]
    pub fn new(interceptors: &'a [Arc<dyn Interceptor>], handler: &'a dyn RpcHandler) -> Self {
        Self {
            rest: interceptors,
            handler,
        }
    }

    /// Run the next stage.
    pub async fn run(self, call: IncomingCall) -> Result<Value> {
        match self.rest.split_first() {
            Some((head, rest)) => {
                head.intercept(
                    call,
                    Next {
                        rest,
                        handler: self.handler,
                    },
                )
                .await
            }
            None => self.handler.handle(call).await,
        }
    }
}

/// Interceptors plus handler, shared by every connection.
#[derive(Clone)]
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
    handler: Arc<dyn RpcHandler>,
}

impl Pipeline {
    /// Pipeline with no interceptors.
    pub fn new(handler: impl RpcHandler + 'static) -> Self {
        Self {
            interceptors: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    /// Append an interceptor; interceptors run in the order added.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Number of interceptors.
    #[must_use]
    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    /// Run a call through the pipeline.
    pub async fn dispatch(&self, call: IncomingCall) -> Result<Value> {
        Next::new(&self.interceptors, self.handler.as_ref())
            .run(call)
            .await
    }
}
