//! Callback registrations - local callables the remote side can invoke by token.
//!
//! Lifetime rules:
//! - Every marshaled callable gets a fresh registration, even if the same closure is
//!   passed twice.
//! - A registration stays live until `dispose()` is called on it (or on a scope that
//!   owns it). Dropping a bare `CallbackRegistration` handle does NOT dispose it.
//! - Disposal is idempotent and safe to race; invoking a disposed registration is an
//!   error reported back to the remote side.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::bridge::protocol::{CallbackId, CallbackToken};
use crate::error::CallbackError;

type ActionFn = dyn Fn() -> BoxFuture<'static, ()> + Send + Sync;
/// A function's serialized return value, or why it could not be serialized.
type Returned = Result<serde_json::Value, String>;
type FunctionFn =
    dyn Fn(serde_json::Value) -> Result<BoxFuture<'static, Returned>, String> + Send + Sync;

enum CallbackKind {
    Action(Box<ActionFn>),
    Function {
        call: Box<FunctionFn>,
        param: &'static str,
    },
}

/// A local callable taking zero ("action") or one ("function") argument.
pub struct Callback {
    kind: CallbackKind,
}

impl Callback {
    pub fn action<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self {
            kind: CallbackKind::Action(Box::new(move || {
                let f = Arc::clone(&f);
                async move { f() }.boxed()
            })),
        }
    }

    pub fn action_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            kind: CallbackKind::Action(Box::new(move || f().boxed())),
        }
    }

    /// One-argument callable; the remote payload is decoded into `T`.
    ///
    /// A missing payload decodes from `null`, so `Option<T>` parameters accept it.
    /// The return value is serialized and handed back to the remote caller; `()`
    /// (or anything serializing to `null`) hands back nothing.
    pub fn function<T, R, F>(f: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::function_async(move |value: T| {
            let f = Arc::clone(&f);
            async move { f(value) }
        })
    }

    pub fn function_async<T, R, F, Fut>(f: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self {
            kind: CallbackKind::Function {
                call: Box::new(move |payload| {
                    let value: T = serde_json::from_value(payload).map_err(|e| e.to_string())?;
                    let fut = f(value);
                    Ok(async move {
                        let returned = fut.await;
                        serde_json::to_value(returned).map_err(|e| e.to_string())
                    }
                    .boxed())
                }),
                param: std::any::type_name::<T>(),
            },
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            CallbackKind::Action(_) => f.write_str("Callback::Action"),
            CallbackKind::Function { param, .. } => write!(f, "Callback::Function<{param}>"),
        }
    }
}

/// Remote-invocation table: callback id → live callable.
pub struct CallbackTable {
    entries: DashMap<CallbackId, Arc<Callback>>,
    method: String,
}

impl CallbackTable {
    /// `method` is the single entry point name every registration exposes.
    pub fn new(method: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            method: method.into(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn register(self: &Arc<Self>, callback: Callback) -> CallbackRegistration {
        let id = CallbackId::new();
        tracing::trace!(callback = %id, kind = ?callback, "Registering callback");
        self.entries.insert(id, Arc::new(callback));

        CallbackRegistration {
            inner: Arc::new(RegistrationInner {
                id,
                method: self.method.clone(),
                table: Arc::downgrade(self),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_registered(&self, id: CallbackId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke a registration on behalf of the remote side.
    ///
    /// Returns the function's serialized result, or `None` for actions and
    /// functions whose result serializes to `null`.
    pub async fn dispatch(
        &self,
        id: CallbackId,
        method: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<Option<serde_json::Value>, CallbackError> {
        // Clone out of the map so no shard lock is held across the await.
        let callback = self
            .entries
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                tracing::warn!(callback = %id, "Remote invoked a disposed callback");
                CallbackError::Disposed { id: id.to_string() }
            })?;

        if method != self.method {
            return Err(CallbackError::UnknownMethod {
                id: id.to_string(),
                method: method.to_string(),
            });
        }

        let panicked = || CallbackError::Failed {
            id: id.to_string(),
            reason: "callback panicked".to_string(),
        };

        let started = std::panic::catch_unwind(AssertUnwindSafe(|| match &callback.kind {
            CallbackKind::Action(call) => match payload {
                None | Some(serde_json::Value::Null) => {
                    Ok(call().map(|()| -> Returned { Ok(serde_json::Value::Null) }).boxed())
                }
                Some(_) => Err(CallbackError::Arity { id: id.to_string() }),
            },
            CallbackKind::Function { call, param } => {
                call(payload.unwrap_or(serde_json::Value::Null)).map_err(|reason| {
                    CallbackError::Payload {
                        id: id.to_string(),
                        reason: format!("expected {param}: {reason}"),
                    }
                })
            }
        }))
        .map_err(|_| panicked())?;

        let result = AssertUnwindSafe(started?)
            .catch_unwind()
            .await
            .map_err(|_| panicked())?
            .map_err(|reason| CallbackError::Failed {
                id: id.to_string(),
                reason: format!("result not serializable: {reason}"),
            })?;

        Ok(match result {
            serde_json::Value::Null => None,
            value => Some(value),
        })
    }

    fn detach(&self, id: CallbackId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Detach every registration. Returns how many were still live.
    pub fn dispose_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

struct RegistrationInner {
    id: CallbackId,
    method: String,
    table: Weak<CallbackTable>,
    disposed: AtomicBool,
}

/// Handle to one live callback registration.
///
/// Clones share the same registration; disposing any clone disposes it.
#[derive(Clone)]
pub struct CallbackRegistration {
    inner: Arc<RegistrationInner>,
}

impl CallbackRegistration {
    pub fn id(&self) -> CallbackId {
        self.inner.id
    }

    /// Wire token substituted for the callable in call arguments.
    pub fn token(&self) -> CallbackToken {
        CallbackToken {
            callback_id: self.inner.id,
            method: self.inner.method.clone(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        if self.inner.disposed.load(Ordering::Acquire) {
            return true;
        }
        match self.inner.table.upgrade() {
            Some(table) => !table.is_registered(self.inner.id),
            None => true,
        }
    }

    /// Detach from the callback table. Returns `true` only for the call that
    /// actually performed the disposal.
    pub fn dispose(&self) -> bool {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(table) = self.inner.table.upgrade() {
            table.detach(self.inner.id);
        }
        tracing::trace!(callback = %self.inner.id, "Callback disposed");
        true
    }
}

impl std::fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("id", &self.inner.id)
            .field("disposed", &self.inner.disposed.load(Ordering::Acquire))
            .finish()
    }
}

/// Caller-owned scope of registrations. Disposes everything it holds on
/// `dispose()` or when dropped.
#[derive(Debug, Default)]
pub struct Disposables {
    registrations: Vec<CallbackRegistration>,
}

impl Disposables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, registration: CallbackRegistration) {
        self.registrations.push(registration);
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn registrations(&self) -> &[CallbackRegistration] {
        &self.registrations
    }

    /// Dispose and forget every held registration. Returns how many this call
    /// actually disposed.
    pub fn dispose(&mut self) -> usize {
        self.registrations
            .drain(..)
            .filter(|registration| registration.dispose())
            .count()
    }
}

impl Extend<CallbackRegistration> for Disposables {
    fn extend<I: IntoIterator<Item = CallbackRegistration>>(&mut self, iter: I) {
        self.registrations.extend(iter);
    }
}

impl Drop for Disposables {
    fn drop(&mut self) {
        let disposed = self.dispose();
        if disposed > 0 {
            tracing::debug!(disposed, "Disposed callback scope on drop");
        }
    }
}

/// Long-lived registrations created by `Bridge::add_listener`.
///
/// Owned by the listener's owner, not the call site. Disposed on `dispose()` or drop.
#[must_use = "dropping the subscription disposes the listener callbacks"]
#[derive(Debug)]
pub struct ListenerSubscription {
    name: String,
    scope: Disposables,
}

impl ListenerSubscription {
    pub(crate) fn new(name: impl Into<String>, scope: Disposables) -> Self {
        Self {
            name: name.into(),
            scope,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registrations(&self) -> &[CallbackRegistration] {
        self.scope.registrations()
    }

    pub fn dispose(mut self) -> usize {
        let disposed = self.scope.dispose();
        tracing::debug!(listener = %self.name, disposed, "Listener disposed");
        disposed
    }
}
