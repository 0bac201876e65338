//! Transport - the two primitives every invocation is built from.
//!
//! [`Transport`] is the seam: `call` for a result, `call_void` for an
//! acknowledgment. [`FramedTransport`] implements it over any byte stream using the
//! length-delimited JSON protocol in [`super::protocol`]. One reader task owns the
//! read half and routes:
//! - `reply`/`ack`/`fault` frames to the waiting caller, by call id
//! - `invoke_callback` frames to the callback table, answering with
//!   `callback_done` or `callback_fault`
//!
//! A well-formed frame that is not a known message is logged and skipped; only a
//! broken stream (bad framing, invalid JSON, EOF) ends the connection.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::JsonCodec;
use super::protocol::{CallId, HostMessage, RemoteMessage};
use crate::callback::CallbackTable;
use crate::config::BridgeConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("transport closed")]
    Closed,

    #[error("codec error: {0}")]
    Codec(String),

    /// The remote side answered with a fault. Diagnostic text is passed through.
    #[error("remote fault: {message}")]
    Remote { message: String },
}

impl TransportError {
    fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
                Self::Codec(e.to_string())
            }
            _ => Self::ConnectionLost(e.to_string()),
        }
    }
}

/// Asynchronous call channel to the remote runtime.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, TransportError>;

    async fn call_void(&self, name: &str, args: Vec<Value>) -> Result<(), TransportError>;

    /// Stop accepting calls. Calls still in flight fail.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type ReplySender = oneshot::Sender<Result<Value, TransportError>>;

struct Shared {
    writer: Mutex<FramedWrite<BoxedWrite, JsonCodec<HostMessage>>>,
    pending: DashMap<CallId, ReplySender>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    async fn send(&self, msg: HostMessage) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.send(msg).await.map_err(TransportError::from_io)
    }

    fn complete(&self, id: CallId, result: Result<Value, TransportError>) {
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                if tx.send(result).is_err() {
                    tracing::trace!(call_id = %id, "Caller gone before reply");
                }
            }
            None => {
                tracing::warn!(call_id = %id, "Reply for unknown call");
            }
        }
    }

    /// Mark closed, then fail everything still waiting.
    fn fail_all(&self, reason: &str) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<CallId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(TransportError::ConnectionLost(reason.to_string())));
                failed += 1;
            }
        }
        failed
    }
}

/// Removes the reply slot when the call future completes or is dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<CallId, ReplySender>,
    id: CallId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(&self.id).is_some() {
            tracing::trace!(call_id = %self.id, "Dropped pending reply slot");
        }
    }
}

/// [`Transport`] over a length-delimited JSON byte stream.
///
/// Must be created inside a tokio runtime: the reader task is spawned on connect
/// and aborted on drop.
pub struct FramedTransport {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl FramedTransport {
    pub fn connect<R, W>(
        reader: R,
        writer: W,
        callbacks: Arc<CallbackTable>,
        config: &BridgeConfig,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxedWrite = Box::new(writer);
        let shared = Arc::new(Shared {
            writer: Mutex::new(FramedWrite::new(
                writer,
                JsonCodec::with_max_frame_length(config.max_frame_length),
            )),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let frames = FramedRead::new(
            reader,
            JsonCodec::<Value>::with_max_frame_length(config.max_frame_length),
        );
        let reader = tokio::spawn(read_loop(frames, Arc::clone(&shared), callbacks));

        tracing::debug!(max_frame_length = config.max_frame_length, "Framed transport connected");
        Self { shared, reader }
    }

    /// Calls still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    async fn request(
        &self,
        msg_for: impl FnOnce(CallId) -> HostMessage,
    ) -> Result<Value, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let id = CallId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            id,
        };

        // fail_all may have drained before the insert landed.
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        self.shared.send(msg_for(id)).await?;
        tracing::trace!(call_id = %id, "Request sent");

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionLost(
                "reply slot dropped".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Transport for FramedTransport {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        self.request(|id| HostMessage::Call {
            id,
            name: name.to_string(),
            args,
        })
        .await
    }

    async fn call_void(&self, name: &str, args: Vec<Value>) -> Result<(), TransportError> {
        self.request(|id| HostMessage::CallVoid {
            id,
            name: name.to_string(),
            args,
        })
        .await
        .map(|_| ())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.reader.abort();
        let failed = self.shared.fail_all("transport closed");
        tracing::debug!(failed, "Framed transport closed");
        let mut writer = self.shared.writer.lock().await;
        writer.close().await.map_err(TransportError::from_io)
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<R, JsonCodec<Value>>,
    shared: Arc<Shared>,
    callbacks: Arc<CallbackTable>,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let reason = loop {
        match frames.next().await {
            Some(Ok(frame)) => match serde_json::from_value::<RemoteMessage>(frame) {
                Ok(msg) => route(msg, &shared, &callbacks),
                Err(e) => tracing::warn!(error = %e, "Skipping unrecognized frame"),
            },
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Transport read failed");
                break format!("read failed: {e}");
            }
            None => break "remote closed the stream".to_string(),
        }
    };

    let failed = shared.fail_all(&reason);
    tracing::debug!(failed, %reason, "Transport reader exiting");
}

fn route(msg: RemoteMessage, shared: &Arc<Shared>, callbacks: &Arc<CallbackTable>) {
    match msg {
        RemoteMessage::Reply { id, result } => shared.complete(id, Ok(result)),
        RemoteMessage::Ack { id } => shared.complete(id, Ok(Value::Null)),
        RemoteMessage::Fault { id, error } => {
            shared.complete(id, Err(TransportError::Remote { message: error }))
        }
        RemoteMessage::InvokeCallback {
            invocation,
            callback,
            method,
            payload,
        } => {
            // Off the reader task: a callback may itself issue calls that need replies.
            let shared = Arc::clone(shared);
            let callbacks = Arc::clone(callbacks);
            tokio::spawn(async move {
                let reply = match callbacks.dispatch(callback, &method, payload).await {
                    Ok(result) => HostMessage::CallbackDone { invocation, result },
                    Err(e) => {
                        tracing::debug!(%callback, invocation, error = %e, "Callback dispatch failed");
                        HostMessage::CallbackFault {
                            invocation,
                            error: e.to_string(),
                        }
                    }
                };
                if let Err(e) = shared.send(reply).await {
                    tracing::warn!(%callback, invocation, error = %e, "Failed to report callback completion");
                }
            });
        }
    }
}
