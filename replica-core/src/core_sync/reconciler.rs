/*
    reconciler.rs - Remote-side stateful replica

    Maintains a materialized copy of a host collection from a DeltaSource.

    Responsibilities:
    - Seed local state from an authoritative snapshot (never from `initial`)
    - Apply versioned deltas in arrival order
    - Detect version gaps and resync from a fresh snapshot
    - Republish the full collection (never a delta) to local subscribers
    - Release every cross-boundary reference on destroy

    Incoming publications land in an inbox and are processed one at a time by a
    spawned task, so applications never interleave. Publications that arrive
    before the initial snapshot wait in the inbox and go through the same
    version check as everything else.
*/

use super::delta::{Payload, Snapshot, VersionInfo};
use super::errors::{SyncError, SyncResult};
use super::map_array::{EntryKey, EntryValue, MapArray};
use super::source::{DeltaCallback, DeltaSource, Teardown};
use crate::core_boundary::retention::{RefId, RetentionTable};
use crate::metrics::Timer;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Snapshot fetch policy for construction and resync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Upper bound on a single snapshot fetch or subscription setup
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Attempts per snapshot fetch before giving up
    pub fetch_attempts: u32,

    /// Pause between attempts
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            fetch_timeout: Duration::from_secs(10),
            fetch_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Identifier of a local replica subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// Receives the full collection after every change
pub type ReplicaListener<K, V> = Arc<dyn Fn(&MapArray<K, V>) + Send + Sync>;

type Inbox<K, V> = mpsc::UnboundedReceiver<(Payload<K, V>, VersionInfo)>;

struct ReplicaState<K, V> {
    current: MapArray<K, V>,
    version: u64,
}

#[derive(Debug, Default)]
struct Counters {
    deltas_applied: AtomicU64,
    snapshots_applied: AtomicU64,
    resyncs: AtomicU64,
    resync_failures: AtomicU64,
    discarded: AtomicU64,
}

struct ReplicaShared<K, V> {
    state: RwLock<ReplicaState<K, V>>,
    listening: AtomicBool,
    subscribers: Mutex<Vec<(SubscriberId, ReplicaListener<K, V>)>>,
    next_subscriber: AtomicU64,
    counters: Counters,
}

enum Resolved<K, V> {
    Apply(Payload<K, V>, u64),
    Adopt(Snapshot<K, V>),
}

impl<K: EntryKey, V: EntryValue> ReplicaShared<K, V> {
    fn state(&self) -> RwLockReadGuard<'_, ReplicaState<K, V>> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, ReplicaState<K, V>> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<(SubscriberId, ReplicaListener<K, V>)>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    async fn handle(
        &self,
        source: &dyn DeltaSource<K, V>,
        config: &ReconcilerConfig,
        payload: Payload<K, V>,
        info: VersionInfo,
    ) {
        if !self.is_listening() {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            trace!(incoming = info.version, "replica destroyed, discarding publication");
            return;
        }

        // The version only advances together with the contents it describes.
        let expected = self.state().version + 1;

        let resolved = if info.version == expected {
            Resolved::Apply(payload, expected)
        } else {
            warn!(expected, incoming = info.version, "replica desynchronized, resyncing");
            self.counters.resyncs.fetch_add(1, Ordering::Relaxed);
            counter!("replica.reconciler.resyncs").increment(1);

            let timer = Timer::new("replica.reconciler.resync_ms");
            match fetch_snapshot(source, config).await {
                Ok(snapshot) => {
                    timer.stop();
                    Resolved::Adopt(snapshot)
                }
                Err(err) => {
                    error!(error = %err, "resync failed, keeping stale replica");
                    self.counters.resync_failures.fetch_add(1, Ordering::Relaxed);
                    counter!("replica.reconciler.resync_failures").increment(1);
                    return;
                }
            }
        };

        if self.commit(resolved) {
            self.notify();
        }
    }

    /// Mutate local state unless destroyed; returns whether anything was applied
    fn commit(&self, resolved: Resolved<K, V>) -> bool {
        let mut state = self.state_mut();
        if !self.is_listening() {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match resolved {
            Resolved::Apply(payload, version) => {
                if matches!(payload, Payload::Snapshot(_)) {
                    self.counters.snapshots_applied.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counters.deltas_applied.fetch_add(1, Ordering::Relaxed);
                    counter!("replica.reconciler.deltas_applied").increment(1);
                }
                payload.apply_to(&mut state.current);
                state.version = version;
                trace!(version = state.version, entries = state.current.len(), "applied publication");
            }
            Resolved::Adopt(snapshot) => {
                self.counters.snapshots_applied.fetch_add(1, Ordering::Relaxed);
                debug!(from = state.version, to = snapshot.version, "adopted authoritative snapshot");
                state.current = snapshot.value;
                state.version = snapshot.version;
            }
        }
        true
    }

    fn notify(&self) {
        let current = self.state().current.clone();
        let listeners: Vec<ReplicaListener<K, V>> =
            self.subscribers().iter().map(|(_, listener)| listener.clone()).collect();
        for listener in listeners {
            listener(&current);
        }
    }

    /// Close the commit barrier; no commit lands once this returns
    fn stop_listening(&self) {
        let _state = self.state_mut();
        self.listening.store(false, Ordering::SeqCst);
    }

    fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|(subscriber_id, _)| *subscriber_id != id);
        subscribers.len() != before
    }
}

/// Fetch a snapshot under the configured timeout/attempt policy
pub async fn fetch_snapshot<K: EntryKey, V: EntryValue>(
    source: &dyn DeltaSource<K, V>,
    config: &ReconcilerConfig,
) -> SyncResult<Snapshot<K, V>> {
    let attempts = config.fetch_attempts.max(1);
    let mut last_error = SyncError::Transport("no snapshot attempt made".to_string());

    for attempt in 1..=attempts {
        match tokio::time::timeout(config.fetch_timeout, source.get_current()).await {
            Ok(Ok(snapshot)) => return Ok(snapshot),
            Ok(Err(err)) => {
                warn!(attempt, attempts, error = %err, "snapshot fetch failed");
                last_error = err;
            }
            Err(_) => {
                warn!(attempt, attempts, timeout = ?config.fetch_timeout, "snapshot fetch timed out");
                last_error = SyncError::Timeout(config.fetch_timeout);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.retry_backoff).await;
        }
    }

    Err(last_error)
}

async fn process<K: EntryKey, V: EntryValue>(
    shared: Arc<ReplicaShared<K, V>>,
    source: Arc<dyn DeltaSource<K, V>>,
    config: ReconcilerConfig,
    mut inbox: Inbox<K, V>,
) {
    while let Some((payload, info)) = inbox.recv().await {
        shared.handle(source.as_ref(), &config, payload, info).await;
    }
    trace!("replica inbox closed");
}

/// Per-replica statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub version: u64,
    pub entries: usize,
    pub subscribers: usize,
    pub deltas_applied: u64,
    pub snapshots_applied: u64,
    pub resyncs: u64,
    pub resync_failures: u64,
    pub discarded: u64,
}

/// Handle returned by `Reconciler::subscribe`
pub struct ReplicaSubscription<K: EntryKey, V: EntryValue> {
    id: Option<SubscriberId>,
    shared: Weak<ReplicaShared<K, V>>,
}

impl<K: EntryKey, V: EntryValue> ReplicaSubscription<K, V> {
    /// None when the subscription was refused (replica already destroyed)
    pub fn id(&self) -> Option<SubscriberId> {
        self.id
    }

    /// Stop receiving notifications; returns false if already gone
    pub fn unsubscribe(self) -> bool {
        match (self.id, self.shared.upgrade()) {
            (Some(id), Some(shared)) => shared.remove_subscriber(id),
            _ => false,
        }
    }
}

/// Locally materialized, always-current replica of a host collection
pub struct Reconciler<K: EntryKey, V: EntryValue> {
    shared: Arc<ReplicaShared<K, V>>,
    source: Arc<dyn DeltaSource<K, V>>,
    source_id: RefId,
    retention: Arc<RetentionTable>,
    config: ReconcilerConfig,
    teardown: Mutex<Option<Teardown>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl<K: EntryKey, V: EntryValue> Reconciler<K, V> {
    /// Retain the source, subscribe, fetch the authoritative snapshot and start
    /// processing publications
    pub async fn create<S>(source: Arc<S>, retention: Arc<RetentionTable>, config: ReconcilerConfig) -> SyncResult<Self>
    where
        S: DeltaSource<K, V> + 'static,
    {
        let source: Arc<dyn DeltaSource<K, V>> = source;
        let source_id = source.ref_id();
        retention.retain(source_id);

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let callback = DeltaCallback::new(move |payload, info: VersionInfo| {
            if inbox_tx.send((payload, info)).is_err() {
                trace!(incoming = info.version, "replica inbox gone, dropping publication");
            }
        });

        let setup = async {
            match tokio::time::timeout(config.fetch_timeout, source.subscribe(callback)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(config.fetch_timeout)),
            }
        };
        let (setup, snapshot) = tokio::join!(setup, fetch_snapshot(source.as_ref(), &config));

        let (teardown, snapshot) = match (setup, snapshot) {
            (Ok((teardown, _)), Ok(snapshot)) => (teardown, snapshot),
            (Ok((teardown, _)), Err(err)) => {
                error!(source = %source_id, error = %err, "initial snapshot failed");
                if let Err(teardown_err) = teardown.run().await {
                    warn!(error = %teardown_err, "teardown after failed construction failed");
                }
                release_source(&retention, source_id);
                return Err(err);
            }
            (Err(_), Err(err)) | (Err(err), Ok(_)) => {
                error!(source = %source_id, error = %err, "replica construction failed");
                release_source(&retention, source_id);
                return Err(err);
            }
        };

        let shared = Arc::new(ReplicaShared {
            state: RwLock::new(ReplicaState { current: snapshot.value, version: snapshot.version }),
            listening: AtomicBool::new(true),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            counters: Counters::default(),
        });

        let worker = tokio::spawn(process(shared.clone(), source.clone(), config.clone(), inbox_rx));
        info!(source = %source_id, version = snapshot.version, "replica ready");

        Ok(Reconciler {
            shared,
            source,
            source_id,
            retention,
            config,
            teardown: Mutex::new(Some(teardown)),
            worker: Mutex::new(Some(worker)),
            destroyed: AtomicBool::new(false),
        })
    }

    /// The latest known full collection
    pub fn current(&self) -> MapArray<K, V> {
        self.shared.state().current.clone()
    }

    /// The version of the latest applied publication or snapshot
    pub fn version(&self) -> u64 {
        self.shared.state().version
    }

    pub fn is_listening(&self) -> bool {
        self.shared.is_listening()
    }

    /// Identity of the retained source reference
    pub fn source_id(&self) -> RefId {
        self.source_id
    }

    /// Register a listener for the full collection after every change.
    ///
    /// After `destroy` the listener is not registered and the returned handle
    /// is inert.
    pub fn subscribe<F>(&self, listener: F) -> ReplicaSubscription<K, V>
    where
        F: Fn(&MapArray<K, V>) + Send + Sync + 'static,
    {
        let mut subscribers = self.shared.subscribers();
        if !self.shared.is_listening() {
            debug!("subscribe on destroyed replica ignored");
            return ReplicaSubscription { id: None, shared: Weak::new() };
        }

        let id = SubscriberId(self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed));
        subscribers.push((id, Arc::new(listener)));
        ReplicaSubscription { id: Some(id), shared: Arc::downgrade(&self.shared) }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers().len()
    }

    /// Get statistics
    pub fn stats(&self) -> ReconcilerStats {
        let (version, entries) = {
            let state = self.shared.state();
            (state.version, state.current.len())
        };
        let counters = &self.shared.counters;
        ReconcilerStats {
            version,
            entries,
            subscribers: self.subscriber_count(),
            deltas_applied: counters.deltas_applied.load(Ordering::Relaxed),
            snapshots_applied: counters.snapshots_applied.load(Ordering::Relaxed),
            resyncs: counters.resyncs.load(Ordering::Relaxed),
            resync_failures: counters.resync_failures.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Adopt a fresh authoritative snapshot now, surfacing transport failures
    pub async fn resync(&self) -> SyncResult<()> {
        if !self.shared.is_listening() {
            return Err(SyncError::Destroyed);
        }

        self.shared.counters.resyncs.fetch_add(1, Ordering::Relaxed);
        counter!("replica.reconciler.resyncs").increment(1);
        let snapshot = match fetch_snapshot(self.source.as_ref(), &self.config).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.shared.counters.resync_failures.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };

        if self.shared.commit(Resolved::Adopt(snapshot)) {
            self.shared.notify();
            Ok(())
        } else {
            Err(SyncError::Destroyed)
        }
    }

    /// Stop listening, tear down the subscription and release the source.
    ///
    /// Idempotent: later calls return `Ok(())` without touching anything.
    pub async fn destroy(&self) -> SyncResult<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shared.stop_listening();
        self.shared.subscribers().clear();

        let teardown = self.teardown.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        let result = match teardown {
            Some(teardown) => teardown.run().await,
            None => Ok(()),
        };
        if let Err(err) = &result {
            warn!(source = %self.source_id, error = %err, "subscription teardown failed");
        }

        release_source(&self.retention, self.source_id);
        info!(source = %self.source_id, "replica destroyed");
        result
    }
}

impl<K: EntryKey, V: EntryValue> Drop for Reconciler<K, V> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()).take() {
            worker.abort();
        }
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!(source = %self.source_id, "replica dropped without destroy");
        self.shared.stop_listening();
        let teardown = self.teardown.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        let retention = self.retention.clone();
        let source_id = self.source_id;
        match (teardown, tokio::runtime::Handle::try_current()) {
            (Some(teardown), Ok(runtime)) => {
                runtime.spawn(async move {
                    if let Err(err) = teardown.run().await {
                        warn!(error = %err, "deferred teardown failed");
                    }
                    release_source(&retention, source_id);
                });
            }
            _ => release_source(&retention, source_id),
        }
    }
}

fn release_source(retention: &RetentionTable, source_id: RefId) {
    if let Err(err) = retention.release(source_id) {
        warn!(source = %source_id, error = %err, "source reference was not retained");
    }
}
