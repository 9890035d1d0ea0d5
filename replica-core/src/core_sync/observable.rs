/*
    observable.rs - Synchronous observable collection on the host side

    The host mutates an ObservableMap; every mutation synchronously notifies the
    registered listeners with the new value. A listener may also be poked without
    a value (`notify`), in which case it reads `current()` itself.

    Mutation and notification are serialized, so listeners observe changes in the
    order they were made. Listeners must not mutate the map they listen to.
*/

use super::map_array::{EntryKey, EntryValue, MapArray};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::trace;

/// Identifier of a registered source listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Callback invoked on every change; `None` means "read current() yourself"
pub type SourceListener<K, V> = Arc<dyn Fn(Option<&MapArray<K, V>>) + Send + Sync>;

/// A synchronous, locally observable collection
pub trait ObservableSource<K, V>: Send + Sync + 'static {
    /// The latest value
    fn current(&self) -> MapArray<K, V>;

    /// Register a change listener
    fn subscribe(&self, listener: SourceListener<K, V>) -> ListenerId;

    /// Remove a change listener; returns false if it was not registered
    fn unsubscribe(&self, id: ListenerId) -> bool;
}

/// Host-owned collection that notifies listeners synchronously
pub struct ObservableMap<K, V> {
    value: RwLock<MapArray<K, V>>,
    listeners: Mutex<Vec<(ListenerId, SourceListener<K, V>)>>,
    next_listener: AtomicU64,
    /// Held across mutate+notify so notifications keep mutation order
    gate: Mutex<()>,
}

impl<K: EntryKey, V: EntryValue> ObservableMap<K, V> {
    pub fn new(initial: MapArray<K, V>) -> Self {
        ObservableMap {
            value: RwLock::new(initial),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            gate: Mutex::new(()),
        }
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, SourceListener<K, V>)>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the whole collection
    pub fn set(&self, value: MapArray<K, V>) {
        self.update(|current| *current = value);
    }

    /// Insert or replace one entry
    pub fn insert(&self, key: K, value: V) {
        self.update(|current| {
            current.insert(key, value);
        });
    }

    /// Remove one entry
    pub fn remove(&self, key: &K) {
        self.update(|current| {
            current.remove(key);
        });
    }

    /// Mutate in place and notify listeners with the result
    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut MapArray<K, V>),
    {
        let _gate = self.gate();
        let next = {
            let mut value = self.value.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            mutate(&mut *value);
            value.clone()
        };
        self.dispatch(Some(&next));
    }

    /// Poke listeners without a value
    pub fn notify(&self) {
        let _gate = self.gate();
        self.dispatch(None);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    fn dispatch(&self, next: Option<&MapArray<K, V>>) {
        let listeners: Vec<SourceListener<K, V>> =
            self.listeners().iter().map(|(_, listener)| listener.clone()).collect();
        trace!(listeners = listeners.len(), "dispatching collection change");
        for listener in listeners {
            listener(next);
        }
    }
}

impl<K: EntryKey, V: EntryValue> Default for ObservableMap<K, V> {
    fn default() -> Self {
        Self::new(MapArray::new())
    }
}

impl<K: EntryKey, V: EntryValue> ObservableSource<K, V> for ObservableMap<K, V> {
    fn current(&self) -> MapArray<K, V> {
        self.value.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn subscribe(&self, listener: SourceListener<K, V>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}
