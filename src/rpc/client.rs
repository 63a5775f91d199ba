//! RPC client.
//!
//! The client owns a [`Connector`] (normally a [`SecureDialer`]) and a
//! [`CredentialChain`]. Credentials are attached before any network I/O, so a
//! secret credential configured over a plaintext channel fails with
//! [`Error::SecurityViolation`] without ever connecting.
//!
//! The connection is opened lazily on the first call, under an async mutex so
//! concurrent first calls share one handshake. Calls are multiplexed over it
//! by id through a pending-response map.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use super::Metadata;
use super::envelope::{RpcRequest, RpcResponse};
use super::server::MAX_FRAME_LEN;
use crate::channel::{ChannelMode, SecureDialer, SecuredStream};
use crate::credentials::CredentialChain;
use crate::{Error, Result};

const OUTBOUND_QUEUE: usize = 64;

/// Opens the byte stream a client talks over.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Security mode of the channels this connector produces.
    fn mode(&self) -> ChannelMode;

    /// Open a channel to `addr`.
    async fn connect(&self, addr: &str) -> Result<SecuredStream>;
}

#[async_trait]
impl Connector for SecureDialer {
    fn mode(&self) -> ChannelMode {
        SecureDialer::mode(self)
    }

    async fn connect(&self, addr: &str) -> Result<SecuredStream> {
        SecureDialer::connect(self, addr).await
    }
}

type PendingMap = DashMap<u64, oneshot::Sender<RpcResponse>>;

/// One established connection: a writer queue and the pending map its reader
/// task resolves.
struct Connection {
    outbound: mpsc::Sender<String>,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
}

impl Connection {
    fn spawn(stream: SecuredStream) -> Self {
        let remote = stream.remote;
        let (read_half, write_half) = tokio::io::split(stream.io);
        let mut frames = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
        let mut sink = FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

        let (outbound, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let writer_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = sink.send(line).await {
                    debug!(error = %e, "Client write failed");
                    break;
                }
            }
            writer_closed.store(true, Ordering::SeqCst);
        });

        let reader_pending = Arc::clone(&pending);
        let reader_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                let line = match frame {
                    Ok(line) => line,
                    Err(e) => {
                        debug!(remote = %remote, error = %e, "Client read failed");
                        break;
                    }
                };
                match serde_json::from_str::<RpcResponse>(&line) {
                    Ok(response) => {
                        if let Some((_, tx)) = reader_pending.remove(&response.id) {
                            let _ = tx.send(response);
                        }
                    }
                    Err(e) => warn!(remote = %remote, error = %e, "Malformed response"),
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            // Dropping the senders wakes every waiter with a closed error.
            reader_pending.clear();
            debug!(remote = %remote, "Client reader task ended");
        });

        Self {
            outbound,
            pending,
            closed,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.outbound.is_closed()
    }
}

/// Removes a pending entry when the call finishes or is abandoned.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// RPC client for one server address.
pub struct RpcClient {
    addr: String,
    connector: Arc<dyn Connector>,
    credentials: CredentialChain,
    default_deadline: Option<Duration>,
    connection: Mutex<Option<Arc<Connection>>>,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Client for `addr`; nothing is opened until the first call.
    pub fn new(
        addr: impl Into<String>,
        connector: impl Connector + 'static,
        credentials: impl Into<CredentialChain>,
    ) -> Self {
        Self {
            addr: addr.into(),
            connector: Arc::new(connector),
            credentials: credentials.into(),
            default_deadline: None,
            connection: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deadline applied to calls that do not pass their own.
    #[must_use]
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    /// Server address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Call `method` with the default deadline, if any.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        match self.default_deadline {
            Some(deadline) => self.call_with_deadline(method, params, deadline).await,
            None => {
                let metadata = self.credentials.metadata_for(self.connector.mode())?;
                self.dispatch(method, metadata, params, None).await
            }
        }
    }

    /// Call `method`, giving up after `deadline`.
    ///
    /// The deadline covers connecting, the handshake and the server's work;
    /// expiry is [`Error::Cancelled`].
    pub async fn call_with_deadline(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value> {
        let metadata = self.credentials.metadata_for(self.connector.mode())?;
        let expires = Instant::now() + deadline;

        tokio::time::timeout(deadline, self.dispatch(method, metadata, params, Some(expires)))
            .await
            .map_err(|_| Error::Cancelled(format!("{method}: deadline of {deadline:?} exceeded")))?
    }

    async fn dispatch(
        &self,
        method: &str,
        metadata: Metadata,
        params: Value,
        expires: Option<Instant>,
    ) -> Result<Value> {
        let conn = self.connection().await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut request = RpcRequest::new(id, method, metadata, params);
        if let Some(expires) = expires {
            request = request.with_timeout(expires.saturating_duration_since(Instant::now()));
        }
        let line = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        conn.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &conn.pending,
            id,
        };
        // The reader sets `closed` before draining the map, so an entry added
        // after the drain is caught here.
        if conn.is_closed() {
            return Err(connection_closed());
        }

        conn.outbound.send(line).await.map_err(|_| connection_closed())?;
        let response = rx.await.map_err(|_| connection_closed())?;
        response.into_result()
    }

    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            if !conn.is_closed() {
                return Ok(Arc::clone(conn));
            }
            debug!(addr = %self.addr, "Connection closed, reconnecting");
        }

        let stream = self.connector.connect(&self.addr).await?;
        let conn = Arc::new(Connection::spawn(stream));
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("addr", &self.addr)
            .field("mode", &self.connector.mode())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

fn connection_closed() -> Error {
    Error::Transport {
        message: "connection closed".to_string(),
        source: None,
    }
}
