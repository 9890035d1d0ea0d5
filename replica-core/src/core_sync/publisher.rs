/*
    publisher.rs - Host-side delta publisher

    Wraps a synchronous observable collection and turns every change into a
    minimal, versioned delta fanned out to all subscribers.

    Responsibilities:
    - Track the last published collection as the baseline for the next delta
    - Own the version counter (starts at 1, +1 per publication)
    - Retain subscriber callbacks for the lifetime of their subscription
    - Serve consistent (value, version) snapshots for resync

    Publications are emitted under the state lock, so subscribers see versions
    in increasing order. Callbacks must be quick and must not block.
*/

use super::delta::{Delta, Payload, Snapshot, VersionInfo};
use super::errors::SyncResult;
use super::map_array::{EntryKey, EntryValue, MapArray};
use super::observable::{ListenerId, ObservableSource, SourceListener};
use super::source::{DeltaCallback, DeltaSource, Teardown};
use crate::core_boundary::retention::{RefId, RetentionTable};
use async_trait::async_trait;
use metrics::{counter, gauge};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Version of the construction-time collection
pub const INITIAL_VERSION: u64 = 1;

struct PublisherState<K, V> {
    version: u64,
    baseline: MapArray<K, V>,
}

struct PublisherShared<K, V> {
    state: Mutex<PublisherState<K, V>>,
    subscribers: Mutex<Vec<DeltaCallback<K, V>>>,
    retention: Arc<RetentionTable>,
}

impl<K: EntryKey, V: EntryValue> PublisherShared<K, V> {
    fn state(&self) -> MutexGuard<'_, PublisherState<K, V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<DeltaCallback<K, V>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, next: MapArray<K, V>) {
        let mut state = self.state();
        let delta = Delta::between(&state.baseline, &next);
        state.baseline = next;
        state.version += 1;
        let info = VersionInfo::new(state.version);

        let subscribers = self.subscribers().clone();
        counter!("replica.publisher.deltas").increment(1);
        debug!(
            version = info.version,
            added = delta.added.len(),
            removed = delta.removed.len(),
            subscribers = subscribers.len(),
            "publishing delta"
        );

        for callback in subscribers {
            callback.call(Payload::Delta(delta.clone()), info);
        }
    }

    fn remove_subscriber(&self, id: RefId) -> usize {
        let mut subscribers = self.subscribers();
        subscribers.retain(|callback| callback.id() != id);
        subscribers.len()
    }
}

/// Publishes minimal versioned deltas of a host collection
pub struct DeltaPublisher<K: EntryKey, V: EntryValue> {
    id: RefId,
    initial: MapArray<K, V>,
    shared: Arc<PublisherShared<K, V>>,
    source: Arc<dyn ObservableSource<K, V>>,
    listener_id: ListenerId,
}

impl<K: EntryKey, V: EntryValue> DeltaPublisher<K, V> {
    /// Start publishing changes of `source`
    pub fn new<S>(source: Arc<S>, retention: Arc<RetentionTable>) -> Self
    where
        S: ObservableSource<K, V>,
    {
        let initial = source.current();
        let shared = Arc::new(PublisherShared {
            state: Mutex::new(PublisherState { version: INITIAL_VERSION, baseline: initial.clone() }),
            subscribers: Mutex::new(Vec::new()),
            retention,
        });

        let weak_shared = Arc::downgrade(&shared);
        let weak_source = Arc::downgrade(&source);
        let listener: SourceListener<K, V> = Arc::new(move |next| {
            let Some(shared) = weak_shared.upgrade() else {
                return;
            };
            let next = match next {
                Some(next) => next.clone(),
                None => match weak_source.upgrade() {
                    Some(source) => source.current(),
                    None => return,
                },
            };
            shared.publish(next);
        });

        // Changes racing with registration block on the state lock and are
        // diffed against the baseline read below.
        let listener_id = {
            let mut state = shared.state();
            let listener_id = source.subscribe(listener);
            state.baseline = source.current();
            listener_id
        };

        let id = RefId::generate();
        debug!(ref_id = %id, entries = initial.len(), "delta publisher started");

        DeltaPublisher { id, initial, shared, source, listener_id }
    }

    /// The collection at construction time; may be stale
    pub fn initial(&self) -> &MapArray<K, V> {
        &self.initial
    }

    /// The version of the last publication
    pub fn version(&self) -> u64 {
        self.shared.state().version
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers().len()
    }

    /// Snapshot without going through the async trait
    pub fn snapshot(&self) -> Snapshot<K, V> {
        let state = self.shared.state();
        Snapshot::new(state.baseline.clone(), state.version)
    }
}

#[async_trait]
impl<K: EntryKey, V: EntryValue> DeltaSource<K, V> for DeltaPublisher<K, V> {
    fn ref_id(&self) -> RefId {
        self.id
    }

    async fn subscribe(&self, callback: DeltaCallback<K, V>) -> SyncResult<(Teardown, VersionInfo)> {
        let callback_id = callback.id();
        self.shared.retention.retain(callback_id);

        let (info, count) = {
            let state = self.shared.state();
            let mut subscribers = self.shared.subscribers();
            subscribers.push(callback);
            (VersionInfo::new(state.version), subscribers.len())
        };
        gauge!("replica.publisher.subscribers").set(count as f64);
        debug!(callback_id = %callback_id, version = info.version, "subscriber registered");

        let shared = self.shared.clone();
        let teardown = Teardown::new(async move {
            shared.retention.release(callback_id)?;
            let remaining = shared.remove_subscriber(callback_id);
            gauge!("replica.publisher.subscribers").set(remaining as f64);
            debug!(callback_id = %callback_id, "subscriber removed");
            Ok(())
        });

        Ok((teardown, info))
    }

    async fn get_current(&self) -> SyncResult<Snapshot<K, V>> {
        let snapshot = self.snapshot();
        trace!(version = snapshot.version, "serving snapshot");
        Ok(snapshot)
    }
}

impl<K: EntryKey, V: EntryValue> Drop for DeltaPublisher<K, V> {
    fn drop(&mut self) {
        self.source.unsubscribe(self.listener_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::observable::ObservableMap;
    use crate::test_utils::{todo, todos, Todo};

    type Seen = Arc<Mutex<Vec<(Payload<String, Todo>, VersionInfo)>>>;

    fn recording_callback() -> (DeltaCallback<String, Todo>, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = DeltaCallback::new(move |payload, info| sink.lock().unwrap().push((payload, info)));
        (callback, seen)
    }

    #[tokio::test]
    async fn test_initial_version_and_snapshot() {
        let host = Arc::new(ObservableMap::new(todos(&[("1", "hello")])));
        let publisher = DeltaPublisher::new(host, Arc::new(RetentionTable::new()));

        let snapshot = publisher.get_current().await.unwrap();
        assert_eq!(snapshot.version, INITIAL_VERSION);
        assert_eq!(snapshot.value, todos(&[("1", "hello")]));
        assert_eq!(publisher.initial(), &todos(&[("1", "hello")]));
    }

    #[tokio::test]
    async fn test_publishes_minimal_delta() {
        let host = Arc::new(ObservableMap::new(todos(&[("1", "First"), ("2", "Second")])));
        let publisher = DeltaPublisher::new(host.clone(), Arc::new(RetentionTable::new()));
        let (callback, seen) = recording_callback();
        let (_teardown, info) = publisher.subscribe(callback).await.unwrap();
        assert_eq!(info.version, 1);

        host.set(todos(&[("1", "First"), ("3", "Third")]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (payload, info) = &seen[0];
        assert_eq!(info.version, 2);
        match payload {
            Payload::Delta(delta) => {
                assert_eq!(delta.added, vec![("3".to_string(), todo("Third"))]);
                assert_eq!(delta.removed, vec!["2".to_string()]);
            }
            Payload::Snapshot(_) => panic!("publisher must emit deltas"),
        }
    }

    #[tokio::test]
    async fn test_one_version_per_change_across_subscribers() {
        let host = Arc::new(ObservableMap::default());
        let publisher = DeltaPublisher::new(host.clone(), Arc::new(RetentionTable::new()));
        let (first, first_seen) = recording_callback();
        let (second, second_seen) = recording_callback();
        let _a = publisher.subscribe(first).await.unwrap();
        let _b = publisher.subscribe(second).await.unwrap();

        host.insert("a".to_string(), todo("A"));
        host.insert("b".to_string(), todo("B"));

        let versions = |seen: &Seen| seen.lock().unwrap().iter().map(|(_, i)| i.version).collect::<Vec<_>>();
        assert_eq!(versions(&first_seen), vec![2, 3]);
        assert_eq!(versions(&second_seen), vec![2, 3]);
        assert_eq!(publisher.version(), 3);
    }

    #[tokio::test]
    async fn test_changes_before_subscribe_advance_version() {
        let host = Arc::new(ObservableMap::new(todos(&[("1", "hello")])));
        let publisher = DeltaPublisher::new(host.clone(), Arc::new(RetentionTable::new()));

        host.set(todos(&[("2", "hello")]));

        let snapshot = publisher.get_current().await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.value, todos(&[("2", "hello")]));
        assert_eq!(publisher.initial(), &todos(&[("1", "hello")]));
    }

    #[tokio::test]
    async fn test_valueless_notification_reads_current() {
        let host = Arc::new(ObservableMap::new(todos(&[("1", "x")])));
        let publisher = DeltaPublisher::new(host.clone(), Arc::new(RetentionTable::new()));
        let (callback, seen) = recording_callback();
        let _sub = publisher.subscribe(callback).await.unwrap();

        host.notify();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1.version, 2);
        assert!(matches!(&seen[0].0, Payload::Delta(delta) if delta.is_empty()));
    }

    #[tokio::test]
    async fn test_subscribe_retains_and_teardown_releases() {
        let retention = Arc::new(RetentionTable::new());
        let host = Arc::new(ObservableMap::default());
        let publisher = DeltaPublisher::new(host.clone(), retention.clone());
        let (callback, seen) = recording_callback();
        let callback_id = callback.id();

        let (teardown, _) = publisher.subscribe(callback).await.unwrap();
        assert_eq!(retention.hold_count(callback_id), 1);
        assert_eq!(publisher.subscriber_count(), 1);

        teardown.run().await.unwrap();
        assert!(!retention.is_retained(callback_id));
        assert_eq!(publisher.subscriber_count(), 0);

        host.insert("late".to_string(), todo("late"));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(publisher.version(), 2);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes_from_source() {
        let host: Arc<ObservableMap<String, Todo>> = Arc::new(ObservableMap::default());
        let publisher = DeltaPublisher::new(host.clone(), Arc::new(RetentionTable::new()));
        assert_eq!(host.listener_count(), 1);

        drop(publisher);
        assert_eq!(host.listener_count(), 0);
    }
}
