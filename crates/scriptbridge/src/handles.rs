//! Handle registry - local proxies for objects owned by the remote runtime.
//!
//! The remote side creates objects as a side effect of calls and hands back opaque
//! ids. The first time an id is resolved locally, a proxy is attached and registered
//! here; it stays until the owner explicitly releases it. Nothing is released on
//! drop: the remote heap cannot see local lifetimes.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Opaque identifier of one live remote object.
///
/// Serializes as the reference token `{"id": "<opaque>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteHandle {
    id: String,
}

impl RemoteHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// A local stand-in for a remote object.
pub trait RemoteBacked: Send + Sync + 'static {
    /// Discriminator naming this proxy type when it appears as a union candidate.
    const TYPE_TAG: &'static str;

    /// Build the proxy for a handle seen for the first time.
    fn attach(handle: RemoteHandle) -> Self
    where
        Self: Sized;

    fn handle(&self) -> &RemoteHandle;

    fn id(&self) -> &str {
        self.handle().id()
    }
}

struct Registered {
    proxy: Arc<dyn Any + Send + Sync>,
    kind: &'static str,
}

impl Registered {
    fn new<P: RemoteBacked>(proxy: Arc<P>) -> Self {
        Self {
            proxy,
            kind: P::TYPE_TAG,
        }
    }

    fn downcast<P: RemoteBacked>(&self, id: &str) -> Result<Arc<P>> {
        Arc::clone(&self.proxy)
            .downcast::<P>()
            .map_err(|_| BridgeError::HandleKindMismatch {
                id: id.to_string(),
                expected: P::TYPE_TAG,
            })
    }
}

/// Thread-safe id → proxy table.
///
/// One instance per bridge; construct a fresh one per test.
pub struct HandleRegistry {
    entries: DashMap<String, Registered>,
}

impl HandleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert `proxy` unless its id is already present; the first registration wins
    /// and is what this returns.
    ///
    /// An id already held by a proxy of another type is `HandleKindMismatch`; the
    /// table is left untouched.
    pub fn register<P: RemoteBacked>(&self, proxy: Arc<P>) -> Result<Arc<P>> {
        let id = proxy.id().to_string();
        match self.entries.entry(id) {
            Entry::Occupied(existing) => {
                existing.get().downcast::<P>(existing.key()).inspect_err(|_| {
                    tracing::warn!(
                        handle = %existing.key(),
                        registered = existing.get().kind,
                        attempted = P::TYPE_TAG,
                        "Handle already registered with another proxy type"
                    );
                })
            }
            Entry::Vacant(slot) => {
                tracing::trace!(handle = %slot.key(), kind = P::TYPE_TAG, "Registering proxy");
                slot.insert(Registered::new(Arc::clone(&proxy)));
                Ok(proxy)
            }
        }
    }

    /// Remove an entry. Absent ids are a no-op; returns whether anything was removed.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            tracing::trace!(handle = %id, "Unregistered proxy");
        }
        removed
    }

    /// Take the entry for `id` out of the table until the release is committed.
    ///
    /// While detached the id resolves as not found, so a racing release sees nothing
    /// to do. Dropping the guard without `commit` puts the entry back.
    pub(crate) fn begin_release(&self, id: &str) -> Option<PendingRelease<'_>> {
        let (id, entry) = self.entries.remove(id)?;
        Some(PendingRelease {
            registry: self,
            id,
            entry: Some(entry),
        })
    }

    pub fn resolve<P: RemoteBacked>(&self, id: &str) -> Result<Arc<P>> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| BridgeError::handle_not_found(id))?;
        entry.downcast::<P>(id)
    }

    /// `resolve` for paths where a missing handle is a legitimate "gone" state.
    pub fn try_resolve<P: RemoteBacked>(&self, id: &str) -> Option<Arc<P>> {
        match self.resolve::<P>(id) {
            Ok(proxy) => Some(proxy),
            Err(e) if e.is_handle_not_found() => None,
            Err(e) => {
                tracing::debug!(handle = %id, error = %e, "Lookup degraded to absent");
                None
            }
        }
    }

    /// Look up the proxy for `handle`, attaching and registering a new one on first
    /// sight. Racing first uses all observe the same proxy.
    pub fn resolve_or_attach<P: RemoteBacked>(&self, handle: RemoteHandle) -> Result<Arc<P>> {
        match self.entries.entry(handle.id().to_string()) {
            Entry::Occupied(existing) => existing.get().downcast::<P>(existing.key()),
            Entry::Vacant(slot) => {
                tracing::trace!(handle = %handle, kind = P::TYPE_TAG, "Attaching proxy");
                let proxy = Arc::new(P::attach(handle));
                slot.insert(Registered::new(Arc::clone(&proxy)));
                Ok(proxy)
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Returns how many were still registered.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

/// A detached registry entry awaiting the remote release.
pub(crate) struct PendingRelease<'a> {
    registry: &'a HandleRegistry,
    id: String,
    entry: Option<Registered>,
}

impl PendingRelease<'_> {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// The remote side let go; forget the entry for good.
    pub(crate) fn commit(mut self) {
        self.entry = None;
        tracing::trace!(handle = %self.id, "Unregistered proxy");
    }
}

impl Drop for PendingRelease<'_> {
    fn drop(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        // A proxy attached for the same id in the meantime stays.
        match self.registry.entries.entry(self.id.clone()) {
            Entry::Vacant(slot) => {
                tracing::debug!(handle = %self.id, "Release not completed, proxy restored");
                slot.insert(entry);
            }
            Entry::Occupied(_) => {
                tracing::debug!(handle = %self.id, "Release not completed, newer proxy kept");
            }
        }
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug)]
    pub(crate) struct Marker {
        handle: RemoteHandle,
    }

    impl RemoteBacked for Marker {
        const TYPE_TAG: &'static str = "Marker";

        fn attach(handle: RemoteHandle) -> Self {
            Self { handle }
        }

        fn handle(&self) -> &RemoteHandle {
            &self.handle
        }
    }

    #[derive(Debug)]
    pub(crate) struct Group {
        handle: RemoteHandle,
    }

    impl RemoteBacked for Group {
        const TYPE_TAG: &'static str = "Group";

        fn attach(handle: RemoteHandle) -> Self {
            Self { handle }
        }

        fn handle(&self) -> &RemoteHandle {
            &self.handle
        }
    }

    fn marker(id: &str) -> Arc<Marker> {
        Arc::new(Marker::attach(RemoteHandle::new(id)))
    }

    #[test]
    fn handle_serializes_as_reference_token() {
        let handle = RemoteHandle::new("marker-12");
        assert_eq!(
            serde_json::to_value(&handle).unwrap(),
            serde_json::json!({"id": "marker-12"})
        );
    }

    #[test]
    fn register_then_resolve_is_identity() {
        let registry = HandleRegistry::new();
        let p = marker("m1");
        let registered = registry.register(Arc::clone(&p)).unwrap();

        let resolved = registry.resolve::<Marker>(registered.id()).unwrap();
        assert!(Arc::ptr_eq(&resolved, &p));
    }

    #[test]
    fn first_registration_wins() {
        let registry = HandleRegistry::new();
        let first = marker("m1");
        let second = marker("m1");

        registry.register(Arc::clone(&first)).unwrap();
        let winner = registry.register(Arc::clone(&second)).unwrap();

        assert!(Arc::ptr_eq(&winner, &first));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.resolve::<Marker>("m1").unwrap(), &first));
    }

    #[test]
    fn unregister_then_resolve_reports_not_found() {
        let registry = HandleRegistry::new();
        registry.register(marker("m1")).unwrap();

        assert!(registry.unregister("m1"));
        let err = registry.resolve::<Marker>("m1").unwrap_err();
        assert!(err.is_handle_not_found());

        // Second and third unregister are no-ops.
        assert!(!registry.unregister("m1"));
        assert!(!registry.unregister("m1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn try_resolve_degrades_to_none() {
        let registry = HandleRegistry::new();
        assert!(registry.try_resolve::<Marker>("late").is_none());

        registry.register(marker("m1")).unwrap();
        assert!(registry.try_resolve::<Group>("m1").is_none());
        assert!(registry.try_resolve::<Marker>("m1").is_some());
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let registry = HandleRegistry::new();
        registry.register(marker("shared")).unwrap();

        let err = registry.resolve::<Group>("shared").unwrap_err();
        assert!(matches!(
            err,
            BridgeError::HandleKindMismatch {
                expected: "Group",
                ..
            }
        ));

        // Registering another type under the same id fails and leaves the table alone.
        let group = Arc::new(Group::attach(RemoteHandle::new("shared")));
        let err = registry.register(group).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::HandleKindMismatch {
                expected: "Group",
                ..
            }
        ));
        assert!(registry.resolve::<Marker>("shared").is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_or_attach_creates_once() {
        let registry = HandleRegistry::new();
        let a = registry
            .resolve_or_attach::<Marker>(RemoteHandle::new("m7"))
            .unwrap();
        let b = registry
            .resolve_or_attach::<Marker>(RemoteHandle::new("m7"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id(), "m7");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_agrees() {
        let registry = HandleRegistry::new();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.register(marker("race")).unwrap()
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            winners.push(task.await.unwrap());
        }

        let canonical = registry.resolve::<Marker>("race").unwrap();
        assert!(winners.iter().all(|w| Arc::ptr_eq(w, &canonical)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn abandoned_release_restores_entry() {
        let registry = HandleRegistry::new();
        let p = marker("m1");
        registry.register(Arc::clone(&p)).unwrap();

        let pending = registry.begin_release("m1").unwrap();
        assert_eq!(pending.id(), "m1");
        assert!(!registry.contains("m1"));
        assert!(registry.begin_release("m1").is_none());
        drop(pending);

        assert!(Arc::ptr_eq(&registry.resolve::<Marker>("m1").unwrap(), &p));

        registry.begin_release("m1").unwrap().commit();
        assert!(registry.is_empty());
        assert!(registry.begin_release("m1").is_none());
    }

    #[test]
    fn abandoned_release_keeps_newer_proxy() {
        let registry = HandleRegistry::new();
        registry.register(marker("m1")).unwrap();

        let pending = registry.begin_release("m1").unwrap();
        let newer = registry
            .resolve_or_attach::<Marker>(RemoteHandle::new("m1"))
            .unwrap();
        drop(pending);

        assert!(Arc::ptr_eq(&registry.resolve::<Marker>("m1").unwrap(), &newer));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_reports_count() {
        let registry = HandleRegistry::new();
        registry.register(marker("a")).unwrap();
        registry.register(marker("b")).unwrap();
        assert_eq!(registry.clear(), 2);
        assert!(!registry.contains("a"));
    }
}
