//! A `DeltaSource` driven by hand from tests
//!
//! Publications are delivered only when the test calls `deliver`, and the
//! snapshot served by `get_current` is whatever the test last scripted. Fetches
//! can be made to fail, or held until the test releases them.

use crate::core_boundary::retention::RefId;
use crate::core_sync::delta::{Delta, Payload, Snapshot, VersionInfo};
use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::map_array::{Entry, EntryKey, EntryValue, MapArray};
use crate::core_sync::source::{DeltaCallback, DeltaSource, Teardown};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ManualSource<K, V> {
    id: RefId,
    callback: Arc<Mutex<Option<DeltaCallback<K, V>>>>,
    current: Mutex<Snapshot<K, V>>,
    fetches: AtomicUsize,
    failing_fetches: AtomicU32,
    stalled: AtomicBool,
    released: Notify,
    teardowns: Arc<AtomicUsize>,
}

impl<K: EntryKey, V: EntryValue> ManualSource<K, V> {
    /// Serve `value` at `version` until told otherwise
    pub fn new(value: MapArray<K, V>, version: u64) -> Arc<Self> {
        Arc::new(ManualSource {
            id: RefId::generate(),
            callback: Arc::new(Mutex::new(None)),
            current: Mutex::new(Snapshot::new(value, version)),
            fetches: AtomicUsize::new(0),
            failing_fetches: AtomicU32::new(0),
            stalled: AtomicBool::new(false),
            released: Notify::new(),
            teardowns: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Invoke the subscribed callback; false if nobody is subscribed
    pub fn deliver(&self, payload: Payload<K, V>, version: u64) -> bool {
        let callback = lock(&self.callback).clone();
        match callback {
            Some(callback) => {
                callback.call(payload, VersionInfo::new(version));
                true
            }
            None => false,
        }
    }

    pub fn deliver_delta(&self, added: Vec<Entry<K, V>>, removed: Vec<K>, version: u64) -> bool {
        self.deliver(Payload::Delta(Delta::new(added, removed)), version)
    }

    /// Change the snapshot served from now on
    pub fn set_current(&self, value: MapArray<K, V>, version: u64) {
        *lock(&self.current) = Snapshot::new(value, version);
    }

    /// Make the next `count` fetches fail with a transport error
    pub fn fail_next_fetches(&self, count: u32) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Hold fetches until called again with `false`
    pub fn stall_fetches(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
        if !stalled {
            self.released.notify_waiters();
        }
    }

    /// Number of `get_current` calls so far, including failed ones
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.callback).is_some()
    }

    /// The identity of the currently subscribed callback
    pub fn subscribed_callback(&self) -> Option<RefId> {
        lock(&self.callback).as_ref().map(|callback| callback.id())
    }

    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<K: EntryKey, V: EntryValue> DeltaSource<K, V> for ManualSource<K, V> {
    fn ref_id(&self) -> RefId {
        self.id
    }

    async fn subscribe(&self, callback: DeltaCallback<K, V>) -> SyncResult<(Teardown, VersionInfo)> {
        *lock(&self.callback) = Some(callback);
        let version = lock(&self.current).version;

        let slot = self.callback.clone();
        let teardowns = self.teardowns.clone();
        let teardown = Teardown::new(async move {
            lock(&slot).take();
            teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Ok((teardown, VersionInfo::new(version)))
    }

    async fn get_current(&self) -> SyncResult<Snapshot<K, V>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        loop {
            let released = self.released.notified();
            if !self.stalled.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }

        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::Transport("scripted fetch failure".to_string()));
        }

        Ok(lock(&self.current).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{todo, todos, Todo};

    #[tokio::test]
    async fn test_scripted_fetches() {
        let source: Arc<ManualSource<String, Todo>> = ManualSource::new(todos(&[("1", "a")]), 3);
        source.fail_next_fetches(1);

        assert!(source.get_current().await.is_err());
        let snapshot = source.get_current().await.unwrap();
        assert_eq!(snapshot.version, 3);
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_deliver_reaches_subscriber_until_teardown() {
        let source: Arc<ManualSource<String, Todo>> = ManualSource::new(MapArray::new(), 1);
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let (teardown, info) =
            source.subscribe(DeltaCallback::new(move |_, _| { sink.fetch_add(1, Ordering::SeqCst); })).await.unwrap();
        assert_eq!(info.version, 1);

        assert!(source.deliver_delta(vec![("1".to_string(), todo("x"))], vec![], 2));
        teardown.run().await.unwrap();
        assert!(!source.deliver_delta(vec![], vec![], 3));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(source.teardown_count(), 1);
    }
}
