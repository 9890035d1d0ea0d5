/*
    source.rs - The publisher shape as seen from the remote side

    A DeltaSource hands out consistent snapshots and a versioned delta stream.
    It is implemented in-process by DeltaPublisher and across the link by
    LinkHandle; the Reconciler only ever talks to this trait.
*/

use super::delta::{Payload, Snapshot, VersionInfo};
use super::errors::SyncResult;
use crate::core_boundary::retention::RefId;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A callback handed across the boundary, identified for retention
pub struct DeltaCallback<K, V> {
    id: RefId,
    handler: Arc<dyn Fn(Payload<K, V>, VersionInfo) + Send + Sync>,
}

impl<K, V> DeltaCallback<K, V> {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Payload<K, V>, VersionInfo) + Send + Sync + 'static,
    {
        Self::with_id(RefId::generate(), handler)
    }

    /// Wrap a handler under an existing identity (used by proxies)
    pub fn with_id<F>(id: RefId, handler: F) -> Self
    where
        F: Fn(Payload<K, V>, VersionInfo) + Send + Sync + 'static,
    {
        DeltaCallback { id, handler: Arc::new(handler) }
    }

    pub fn id(&self) -> RefId {
        self.id
    }

    pub fn call(&self, payload: Payload<K, V>, info: VersionInfo) {
        (self.handler)(payload, info)
    }
}

impl<K, V> Clone for DeltaCallback<K, V> {
    fn clone(&self) -> Self {
        DeltaCallback { id: self.id, handler: self.handler.clone() }
    }
}

impl<K, V> fmt::Debug for DeltaCallback<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaCallback").field("id", &self.id).finish()
    }
}

/// Deferred undo of a subscription; consumed when run
#[must_use = "a teardown that is never run leaks the subscription"]
pub struct Teardown {
    future: BoxFuture<'static, SyncResult<()>>,
}

impl Teardown {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = SyncResult<()>> + Send + 'static,
    {
        Teardown { future: Box::pin(future) }
    }

    /// Teardown that does nothing
    pub fn noop() -> Self {
        Self::new(async { Ok(()) })
    }

    pub async fn run(self) -> SyncResult<()> {
        self.future.await
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Teardown")
    }
}

/// The publisher contract consumed by reconcilers
#[async_trait]
pub trait DeltaSource<K, V>: Send + Sync {
    /// Identity of this reference for retention
    fn ref_id(&self) -> RefId;

    /// Register a callback for every publication; returns its teardown and
    /// the version at subscription time
    async fn subscribe(&self, callback: DeltaCallback<K, V>) -> SyncResult<(Teardown, VersionInfo)>;

    /// The authoritative collection and its version, consistent with each other
    async fn get_current(&self) -> SyncResult<Snapshot<K, V>>;
}
