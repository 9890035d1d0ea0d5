/*
    Sync subsystem - Keep a remote replica of a host collection current

    The host side publishes minimal versioned deltas of an observable
    collection; the remote side applies them and resyncs from an authoritative
    snapshot whenever versions stop lining up.
*/

pub mod delta;
pub mod errors;
pub mod map_array;
pub mod observable;
pub mod publisher;
pub mod reconciler;
pub mod source;

#[cfg(test)]
pub mod tests;

pub use delta::{Delta, Payload, Snapshot, VersionInfo};
pub use errors::{RetentionError, SyncError, SyncResult};
pub use map_array::{Entry, EntryKey, EntryValue, MapArray};
pub use observable::{ListenerId, ObservableMap, ObservableSource, SourceListener};
pub use publisher::{DeltaPublisher, INITIAL_VERSION};
pub use reconciler::{
    fetch_snapshot, Reconciler, ReconcilerConfig, ReconcilerStats, ReplicaListener, ReplicaSubscription, SubscriberId,
};
pub use source::{DeltaCallback, DeltaSource, Teardown};
