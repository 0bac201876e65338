//! Invocation facade - the typed API callers use.
//!
//! Every operation runs the same pipeline: marshal the arguments, make one transport
//! round-trip, resolve the raw result into the requested shape. The phase of each call
//! is traced (`Pending → Marshaled → Dispatched → Resolved | Faulted`).
//!
//! Callback registrations created while marshaling are owned by:
//! - the `Disposables` scope passed to a `*_with` method,
//! - the `ListenerSubscription` returned by `add_listener`,
//! - otherwise the bridge itself, until `close`.

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bridge::transport::{FramedTransport, Transport, TransportError};
use crate::callback::{CallbackRegistration, CallbackTable, Disposables, ListenerSubscription};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::handles::{HandleRegistry, RemoteBacked, RemoteHandle};
use crate::marshal::{Arg, marshal};
use crate::resolve::{
    Candidate, OneOf2, OneOf3, ResolveContext, UnionContract, resolve_plain, resolve_proxy,
    resolve_union,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Pending,
    Marshaled,
    Dispatched,
    Resolved,
    Faulted,
}

impl CallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Faulted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Marshaled => "marshaled",
            Self::Dispatched => "dispatched",
            Self::Resolved => "resolved",
            Self::Faulted => "faulted",
        }
    }
}

impl std::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy)]
enum Expect {
    Value,
    Ack,
}

/// Facade over one remote runtime.
///
/// Cheap to clone; clones share the transport, handle registry and callback table.
#[derive(Clone)]
pub struct Bridge {
    transport: Arc<dyn Transport>,
    registry: Arc<HandleRegistry>,
    callbacks: Arc<CallbackTable>,
    config: Arc<BridgeConfig>,
}

impl Bridge {
    pub fn new(
        transport: Arc<dyn Transport>,
        callbacks: Arc<CallbackTable>,
        registry: Arc<HandleRegistry>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            callbacks,
            config: Arc::new(config),
        }
    }

    /// Bridge over a framed byte stream, with a fresh registry and callback table.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect<R, W>(reader: R, writer: W, config: BridgeConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let callbacks = CallbackTable::new(config.callback_method.clone());
        let transport =
            FramedTransport::connect(reader, writer, Arc::clone(&callbacks), &config);
        Self::new(Arc::new(transport), callbacks, HandleRegistry::new(), config)
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn callbacks(&self) -> &Arc<CallbackTable> {
        &self.callbacks
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Fire a call for its side effects. Callback registrations it creates stay live
    /// until `close`.
    pub async fn invoke_void(&self, name: &str, args: Vec<Arg>) -> Result<()> {
        let mut created = Vec::new();
        self.round_trip(name, args, Expect::Ack, &mut created)
            .await
            .map(|_| ())
    }

    /// `invoke_void`, handing created registrations to `scope`.
    pub async fn invoke_void_with(
        &self,
        name: &str,
        args: Vec<Arg>,
        scope: &mut Disposables,
    ) -> Result<()> {
        let mut created = Vec::new();
        let result = self.round_trip(name, args, Expect::Ack, &mut created).await;
        scope.extend(created);
        result.map(|_| ())
    }

    pub async fn invoke<T: DeserializeOwned>(&self, name: &str, args: Vec<Arg>) -> Result<T> {
        let mut created = Vec::new();
        let raw = self
            .round_trip(name, args, Expect::Value, &mut created)
            .await?;
        self.finish(name, resolve_plain(raw))
    }

    pub async fn invoke_with<T: DeserializeOwned>(
        &self,
        name: &str,
        args: Vec<Arg>,
        scope: &mut Disposables,
    ) -> Result<T> {
        let mut created = Vec::new();
        let raw = self.round_trip(name, args, Expect::Value, &mut created).await;
        scope.extend(created);
        self.finish(name, resolve_plain(raw?))
    }

    /// Call returning a remote object. `null` resolves to `None`.
    pub async fn invoke_proxy<P: RemoteBacked>(
        &self,
        name: &str,
        args: Vec<Arg>,
    ) -> Result<Option<Arc<P>>> {
        let mut created = Vec::new();
        let raw = self
            .round_trip(name, args, Expect::Value, &mut created)
            .await?;
        self.finish(name, resolve_proxy::<P>(raw, &self.registry))
    }

    pub async fn invoke_union<U: UnionContract>(&self, name: &str, args: Vec<Arg>) -> Result<U> {
        let mut created = Vec::new();
        let raw = self
            .round_trip(name, args, Expect::Value, &mut created)
            .await?;
        let ctx = ResolveContext {
            type_tag_field: &self.config.type_tag_field,
            registry: &self.registry,
        };
        self.finish(name, resolve_union::<U>(raw, &ctx))
    }

    pub async fn invoke2<A, B>(&self, name: &str, args: Vec<Arg>) -> Result<OneOf2<A, B>>
    where
        A: Candidate,
        B: Candidate,
    {
        self.invoke_union(name, args).await
    }

    pub async fn invoke3<A, B, C>(&self, name: &str, args: Vec<Arg>) -> Result<OneOf3<A, B, C>>
    where
        A: Candidate,
        B: Candidate,
        C: Candidate,
    {
        self.invoke_union(name, args).await
    }

    /// Subscribe a listener. The returned subscription owns every registration the
    /// call created; if the call fails they are disposed immediately.
    pub async fn add_listener(&self, name: &str, args: Vec<Arg>) -> Result<ListenerSubscription> {
        let mut created = Vec::new();
        let result = self.round_trip(name, args, Expect::Ack, &mut created).await;

        let mut scope = Disposables::new();
        scope.extend(created);
        result?;

        tracing::debug!(listener = %name, callbacks = scope.len(), "Listener subscribed");
        Ok(ListenerSubscription::new(name, scope))
    }

    pub async fn release<P: RemoteBacked>(&self, proxy: &P) -> Result<bool> {
        self.release_id(proxy.id()).await
    }

    /// Tell the remote side to release `id`, then drop the local proxy. Returns
    /// whether this call performed the release.
    ///
    /// The proxy is detached while the release is in flight and restored if it fails
    /// or is cancelled, so a failed release can be retried.
    pub async fn release_id(&self, id: &str) -> Result<bool> {
        let token = serde_json::to_value(RemoteHandle::new(id)).map_err(BridgeError::Serialize)?;
        let Some(pending) = self.registry.begin_release(id) else {
            tracing::trace!(handle = %id, "Release of unknown handle ignored");
            return Ok(false);
        };

        let method = &self.config.release_method;
        self.transport
            .call_void(method, vec![token])
            .await
            .map_err(|e| remote_error(method, e))?;

        tracing::debug!(handle = %pending.id(), "Handle released");
        pending.commit();
        Ok(true)
    }

    /// Registered proxy for `id`, or `None` if it is gone or of another type.
    pub fn lookup<P: RemoteBacked>(&self, id: &str) -> Option<Arc<P>> {
        self.registry.try_resolve::<P>(id)
    }

    /// Dispose every remaining callback, forget every handle and close the transport.
    pub async fn close(&self) -> Result<()> {
        let disposed = self.callbacks.dispose_all();
        let forgotten = self.registry.clear();
        tracing::debug!(disposed, forgotten, "Bridge closing");
        self.transport.close().await?;
        Ok(())
    }

    async fn round_trip(
        &self,
        name: &str,
        args: Vec<Arg>,
        expect: Expect,
        created: &mut Vec<CallbackRegistration>,
    ) -> Result<Value> {
        tracing::trace!(%name, phase = %CallPhase::Pending, "Invocation started");

        let wire = match marshal(args, &self.callbacks, created) {
            Ok(wire) => wire,
            Err(e) => {
                // Nothing reached the remote side, so nothing can hold these tokens.
                for registration in created.drain(..) {
                    registration.dispose();
                }
                return self.finish(name, Err(e));
            }
        };
        tracing::trace!(
            %name,
            phase = %CallPhase::Marshaled,
            args = wire.len(),
            callbacks = created.len(),
            "Arguments marshaled"
        );

        let started = Instant::now();
        tracing::trace!(%name, phase = %CallPhase::Dispatched, "Dispatching");
        let outcome = match expect {
            Expect::Value => self.transport.call(name, wire).await,
            Expect::Ack => self.transport.call_void(name, wire).await.map(|()| Value::Null),
        };
        tracing::trace!(
            %name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Round-trip complete"
        );

        match outcome {
            Ok(raw) => match expect {
                Expect::Value => Ok(raw),
                Expect::Ack => self.finish(name, Ok(raw)),
            },
            Err(e) => self.finish(name, Err(remote_error(name, e))),
        }
    }

    /// Trace the terminal phase of a call.
    fn finish<T>(&self, name: &str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => tracing::debug!(%name, phase = %CallPhase::Resolved, "Invocation resolved"),
            Err(e) => tracing::debug!(%name, phase = %CallPhase::Faulted, error = %e, "Invocation faulted"),
        }
        result
    }
}

fn remote_error(name: &str, e: TransportError) -> BridgeError {
    match e {
        TransportError::Remote { message } => BridgeError::Remote {
            name: name.to_string(),
            message,
        },
        other => BridgeError::Transport(other),
    }
}
