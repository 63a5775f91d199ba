//! RPC server.
//!
//! Accepts TCP connections, secures each one through the configured
//! [`SecureListener`] and then reads line-delimited [`RpcRequest`]s. Every
//! request runs in its own task through the [`Pipeline`]; responses go back
//! through a single writer task per connection, so they may arrive out of
//! order and are matched by id.
//!
//! A connection that fails the TLS handshake is dropped before any request is
//! read, so it never reaches an interceptor.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, info, warn};

use super::envelope::{RpcRequest, RpcResponse, StatusCode};
use super::service::{IncomingCall, Pipeline};
use crate::channel::SecureListener;
use crate::{Error, Result};

/// Longest accepted frame, in bytes.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Server-side upper bound on a call when the client sends no deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const RESPONSE_QUEUE: usize = 64;

/// RPC server, ready to bind.
#[derive(Clone)]
pub struct RpcServer {
    listener: SecureListener,
    pipeline: Arc<Pipeline>,
    request_timeout: Duration,
}

impl RpcServer {
    /// Server securing connections with `listener` and serving `pipeline`.
    #[must_use]
    pub fn new(listener: SecureListener, pipeline: Pipeline) -> Self {
        Self {
            listener,
            pipeline: Arc::new(pipeline),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Upper bound on a single call. Client deadlines can only shorten it.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bind the TCP socket.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] when the address cannot be bound.
    pub async fn bind(self, addr: &str) -> Result<BoundServer> {
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::transport(format!("cannot bind {addr}"), e))?;
        Ok(BoundServer { tcp, server: self })
    }
}

/// A server with a bound socket.
pub struct BoundServer {
    tcp: TcpListener,
    server: RpcServer,
}

impl BoundServer {
    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.tcp
            .local_addr()
            .map_err(|e| Error::transport("cannot read local address", e))
    }

    /// Serve until the process is interrupted (Ctrl-C).
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Serve until `shutdown` completes. In-flight connections are left to
    /// finish on their own tasks.
    pub async fn serve_with_shutdown(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let local = self.local_addr()?;
        info!(
            addr = %local,
            mode = self.server.listener.mode().as_str(),
            interceptors = self.server.pipeline.interceptor_count(),
            "RPC server listening"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("RPC server shutting down");
                    return Ok(());
                }
                accepted = self.tcp.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let server = self.server.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, remote).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }
    }
}

impl RpcServer {
    async fn handle_connection(self, stream: TcpStream, remote: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(remote = %remote, error = %e, "Cannot set TCP_NODELAY");
        }

        let secured = match self.listener.secure(stream, remote).await {
            Ok(secured) => secured,
            Err(e) => {
                warn!(remote = %remote, error = %e, "Dropping connection");
                return;
            }
        };

        let peer_identity = secured.peer_identity.map(Arc::new);
        let remote = secured.remote;
        let (read_half, write_half) = tokio::io::split(secured.io);
        let mut frames = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
        let mut sink = FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

        let (tx, mut rx) = mpsc::channel::<RpcResponse>(RESPONSE_QUEUE);
        let writer_remote = remote.clone();
        let writer = tokio::spawn(async move {
            while let Some(response) = rx.recv().await {
                let line = match serde_json::to_string(&response) {
                    Ok(line) => line,
                    Err(e) => {
                        error!(id = response.id, error = %e, "Failed to encode response");
                        continue;
                    }
                };
                if let Err(e) = sink.send(line).await {
                    debug!(remote = %writer_remote, error = %e, "Write failed, closing");
                    break;
                }
            }
        });

        debug!(remote = %remote, "Connection open");

        while let Some(frame) = frames.next().await {
            let line = match frame {
                Ok(line) => line,
                Err(e) => {
                    debug!(remote = %remote, error = %e, "Read failed, closing");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let request = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(remote = %remote, error = %e, "Malformed request");
                    let response = RpcResponse::error(
                        request_id_hint(&line),
                        StatusCode::InvalidArgument,
                        format!("malformed request: {e}"),
                    );
                    if tx.send(response).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let deadline = request
                .timeout()
                .map_or(self.request_timeout, |t| t.min(self.request_timeout));
            let id = request.id;
            let call = IncomingCall {
                method: request.method,
                metadata: request.metadata,
                params: request.params.unwrap_or(Value::Null),
                peer_identity: peer_identity.clone(),
                remote: remote.clone(),
                principal: None,
            };

            let pipeline = Arc::clone(&self.pipeline);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = run_call(&pipeline, id, call, deadline).await;
                let _ = tx.send(response).await;
            });
        }

        // Writer ends once every in-flight call has dropped its sender.
        drop(tx);
        let _ = writer.await;
        debug!(remote = %remote, "Connection closed");
    }
}

async fn run_call(
    pipeline: &Pipeline,
    id: u64,
    call: IncomingCall,
    deadline: Duration,
) -> RpcResponse {
    let method = call.method.clone();
    let outcome = match tokio::time::timeout(deadline, pipeline.dispatch(call)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::Cancelled(format!(
            "{method} did not complete within {deadline:?}"
        ))),
    };

    match outcome {
        Ok(result) => RpcResponse::success(id, result),
        Err(e) => {
            let code = e.status_code();
            debug!(id, method = %method, code = %code, "Call failed");
            RpcResponse::error(id, code, e.to_string())
        }
    }
}

/// Best-effort id of a request that failed to decode.
fn request_id_hint(line: &str) -> u64 {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_u64))
        .unwrap_or(0)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}
