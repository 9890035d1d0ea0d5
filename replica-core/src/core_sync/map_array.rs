/*
    map_array.rs - Keyed, order-insensitive collection

    A map-array is a set of unique (key, value) entries. Only key uniqueness is
    meaningful; iteration order is incidental. On the wire it is a sequence of
    [key, value] pairs so that keys need not be strings.
*/

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::hash_map;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// A single (key, value) pair
pub type Entry<K, V> = (K, V);

/// Bounds every collection key satisfies
pub trait EntryKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> EntryKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bounds every collection value satisfies
pub trait EntryValue: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> EntryValue for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// Unordered collection of key-unique entries
#[derive(Debug, Clone)]
pub struct MapArray<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> Default for MapArray<K, V> {
    fn default() -> Self {
        MapArray { entries: HashMap::new() }
    }
}

impl<K: Eq + Hash, V> MapArray<K, V> {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value stored under `key`
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Remove an entry by key
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> hash_map::Keys<'_, K, V> {
        self.entries.keys()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, K, V> {
        self.entries.iter()
    }

    /// Keep only the entries matching the predicate
    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        self.entries.retain(f);
    }

    /// Clone out all entries, in no particular order
    pub fn entries(&self) -> Vec<Entry<K, V>>
    where
        K: Clone,
        V: Clone,
    {
        self.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Clone out all entries ordered by key, for display and comparison
    pub fn sorted_entries(&self) -> Vec<Entry<K, V>>
    where
        K: Clone + Ord,
        V: Clone,
    {
        let mut entries = self.entries();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for MapArray<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Eq + Hash, V: Eq> Eq for MapArray<K, V> {}

impl<K: Eq + Hash, V> FromIterator<Entry<K, V>> for MapArray<K, V> {
    fn from_iter<I: IntoIterator<Item = Entry<K, V>>>(iter: I) -> Self {
        MapArray { entries: iter.into_iter().collect() }
    }
}

impl<K: Eq + Hash, V> From<Vec<Entry<K, V>>> for MapArray<K, V> {
    fn from(entries: Vec<Entry<K, V>>) -> Self {
        entries.into_iter().collect()
    }
}

impl<K: Eq + Hash, V> Extend<Entry<K, V>> for MapArray<K, V> {
    fn extend<I: IntoIterator<Item = Entry<K, V>>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl<K, V> IntoIterator for MapArray<K, V> {
    type Item = Entry<K, V>;
    type IntoIter = hash_map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a, K, V> IntoIterator for &'a MapArray<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = hash_map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: Serialize, V: Serialize> Serialize for MapArray<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de, K, V> Deserialize<'de> for MapArray<K, V>
where
    K: Deserialize<'de> + Eq + Hash,
    V: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<Entry<K, V>>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_value() {
        let mut map = MapArray::new();
        assert_eq!(map.insert("a", 1), None);
        assert_eq!(map.insert("a", 2), Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&"a"), Some(&2));
    }

    #[test]
    fn test_equality_ignores_order() {
        let left: MapArray<&str, i32> = vec![("a", 1), ("b", 2)].into();
        let right: MapArray<&str, i32> = vec![("b", 2), ("a", 1)].into();
        assert_eq!(left, right);
    }

    #[test]
    fn test_duplicate_keys_collapse() {
        let map: MapArray<&str, i32> = vec![("a", 1), ("a", 3)].into();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&"a"), Some(&3));
    }

    #[test]
    fn test_sorted_entries() {
        let map: MapArray<u32, &str> = vec![(3, "c"), (1, "a"), (2, "b")].into();
        assert_eq!(map.sorted_entries(), vec![(1, "a"), (2, "b"), (3, "c")]);
    }

    #[test]
    fn test_json_shape_is_pair_sequence() {
        let map: MapArray<u32, String> = vec![(7, "seven".to_string())].into();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"[[7,"seven"]]"#);

        let decoded: MapArray<u32, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, map);
    }
}
