/*
    delta.rs - Minimal change description between two collection versions

    Responsibilities:
    - Compute the added entries and removed keys between two collections
    - Apply a delta (or a full snapshot) to a materialized collection
    - Carry the version stamp that accompanies every publication

    An update to an existing key is encoded as a re-add of that key; applying a
    delta upserts every added entry before deleting removed keys.
*/

use super::map_array::{Entry, MapArray};
use serde::{Deserialize, Serialize};
use std::hash::Hash;

/// Entries added (or replaced) and keys removed at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta<K, V> {
    pub added: Vec<Entry<K, V>>,
    pub removed: Vec<K>,
}

impl<K, V> Default for Delta<K, V> {
    fn default() -> Self {
        Delta { added: Vec::new(), removed: Vec::new() }
    }
}

impl<K, V> Delta<K, V> {
    pub fn new(added: Vec<Entry<K, V>>, removed: Vec<K>) -> Self {
        Delta { added, removed }
    }

    /// True when the delta changes nothing
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Number of entries and keys carried
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

impl<K, V> Delta<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
    /// Compute the delta that turns `prev` into `next`
    pub fn between(prev: &MapArray<K, V>, next: &MapArray<K, V>) -> Self {
        let added = next
            .iter()
            .filter(|(key, value)| prev.get(key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let removed = prev.keys().filter(|key| !next.contains_key(key)).cloned().collect();

        Delta { added, removed }
    }

    /// Apply to a materialized collection
    pub fn apply_to(self, target: &mut MapArray<K, V>) {
        target.extend(self.added);
        for key in &self.removed {
            target.remove(key);
        }
    }
}

/// What a publication carries: a delta, or a raw full collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: Deserialize<'de> + Eq + Hash, V: Deserialize<'de>"
))]
pub enum Payload<K, V> {
    Delta(Delta<K, V>),
    Snapshot(MapArray<K, V>),
}

impl<K, V> Payload<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
    /// Apply to a materialized collection; a snapshot replaces it wholesale
    pub fn apply_to(self, target: &mut MapArray<K, V>) {
        match self {
            Payload::Delta(delta) => delta.apply_to(target),
            Payload::Snapshot(value) => *target = value,
        }
    }
}

impl<K, V> From<Delta<K, V>> for Payload<K, V> {
    fn from(delta: Delta<K, V>) -> Self {
        Payload::Delta(delta)
    }
}

/// Version stamp accompanying publications and subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u64,
}

impl VersionInfo {
    pub fn new(version: u64) -> Self {
        VersionInfo { version }
    }
}

/// A collection together with the version it was read at
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: Deserialize<'de> + Eq + Hash, V: Deserialize<'de>"
))]
pub struct Snapshot<K, V> {
    pub value: MapArray<K, V>,
    pub version: u64,
}

impl<K, V> Snapshot<K, V> {
    pub fn new(value: MapArray<K, V>, version: u64) -> Self {
        Snapshot { value, version }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&'static str, &'static str)]) -> MapArray<&'static str, &'static str> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_between_reports_added_and_removed() {
        let prev = map(&[("1", "First"), ("2", "Second")]);
        let next = map(&[("1", "First"), ("3", "Third")]);

        let delta = Delta::between(&prev, &next);

        assert_eq!(delta.added, vec![("3", "Third")]);
        assert_eq!(delta.removed, vec!["2"]);
    }

    #[test]
    fn test_value_change_is_a_readd() {
        let prev = map(&[("1", "old")]);
        let next = map(&[("1", "new")]);

        let delta = Delta::between(&prev, &next);

        assert_eq!(delta.added, vec![("1", "new")]);
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn test_unchanged_collection_gives_empty_delta() {
        let prev = map(&[("1", "same")]);
        let delta = Delta::between(&prev, &prev.clone());
        assert!(delta.is_empty());
        assert_eq!(delta.len(), 0);
    }

    #[test]
    fn test_apply_upserts_then_removes() {
        let mut current = map(&[("1", "old"), ("2", "gone")]);
        let delta = Delta::new(vec![("1", "new"), ("3", "fresh")], vec!["2"]);

        delta.apply_to(&mut current);

        assert_eq!(current, map(&[("1", "new"), ("3", "fresh")]));
    }

    #[test]
    fn test_apply_reproduces_next() {
        let prev = map(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let next = map(&[("b", "20"), ("c", "3"), ("d", "4")]);

        let mut replica = prev.clone();
        Delta::between(&prev, &next).apply_to(&mut replica);

        assert_eq!(replica, next);
    }

    #[test]
    fn test_snapshot_payload_replaces_wholesale() {
        let mut current = map(&[("1", "x")]);
        Payload::Snapshot(map(&[("9", "y")])).apply_to(&mut current);
        assert_eq!(current, map(&[("9", "y")]));
    }

    #[test]
    fn test_payload_json_shape() {
        let payload: Payload<String, u32> =
            Delta::new(vec![("k".to_string(), 1)], vec!["gone".to_string()]).into();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["Delta"]["added"][0][0], "k");
        assert_eq!(json["Delta"]["removed"][0], "gone");
    }
}
