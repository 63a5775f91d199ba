//! Minimal RPC plumbing: envelope, metadata, server and client.

pub mod client;
pub mod envelope;
pub mod metadata;
pub mod server;
pub mod service;

pub use client::{Connector, RpcClient};
pub use envelope::{JSONRPC_VERSION, RpcRequest, RpcResponse, RpcStatus, StatusCode};
pub use metadata::{AUTHORIZATION, Metadata};
pub use server::{BoundServer, DEFAULT_REQUEST_TIMEOUT, MAX_FRAME_LEN, RpcServer};
pub use service::{IncomingCall, Interceptor, Next, Pipeline, RpcHandler};
