//! Minimal change-set computation between two snapshots of a collection.
//!
//! Replacing a whole collection on every edit would turn a one-cell change
//! into a full-array CRDT update; diffing keyed snapshots first keeps each
//! mutation down to a single replicated-map key. The contract: every key
//! present in exactly one snapshot appears in the result, keys whose values
//! are deep-equal across both appear nowhere, and keys present in both with
//! different values land in `added` (a keyed set is a re-add).

use std::collections::HashMap;

/// Diff of two keyed snapshots of the same logical collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyedDiff<V> {
    /// Keys new in the second snapshot, or present in both with a changed
    /// value, paired with the new value.
    pub added: Vec<(String, V)>,
    /// Keys present only in the first snapshot.
    pub removed: Vec<String>,
}

impl<V> KeyedDiff<V> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Diff two keyed snapshots. Output ordering is sorted by key for
/// deterministic change lists.
pub fn diff_keyed<V: Clone + PartialEq>(
    old: &HashMap<String, V>,
    new: &HashMap<String, V>,
) -> KeyedDiff<V> {
    let mut added: Vec<(String, V)> = new
        .iter()
        .filter(|&(key, value)| old.get(key.as_str()) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    added.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut removed: Vec<String> = old
        .keys()
        .filter(|key| !new.contains_key(*key))
        .cloned()
        .collect();
    removed.sort();

    KeyedDiff { added, removed }
}

/// Diff of two array-valued snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceDiff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub updated: Vec<T>,
}

impl<T> Default for SliceDiff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            updated: Vec::new(),
        }
    }
}

impl<T> SliceDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Diff two slices using a caller-supplied key extractor: entries whose key
/// appears only in `new` are added, only in `old` are removed, and entries
/// sharing a key but comparing unequal are updated (carrying the new value).
pub fn diff_slices<T, K, F>(old: &[T], new: &[T], key: F) -> SliceDiff<T>
where
    T: Clone + PartialEq,
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let old_by_key: HashMap<K, &T> = old.iter().map(|item| (key(item), item)).collect();
    let new_by_key: HashMap<K, &T> = new.iter().map(|item| (key(item), item)).collect();

    let mut diff = SliceDiff::default();
    for item in new {
        match old_by_key.get(&key(item)) {
            None => diff.added.push(item.clone()),
            Some(previous) if *previous != item => diff.updated.push(item.clone()),
            Some(_) => {}
        }
    }
    for item in old {
        if !new_by_key.contains_key(&key(item)) {
            diff.removed.push(item.clone());
        }
    }
    diff
}

/// Value-identity fallback for collections without a natural key: an entry is
/// added when absent from `old`, removed when absent from `new`; there are no
/// updates.
pub fn diff_slices_by_value<T: Clone + PartialEq>(old: &[T], new: &[T]) -> SliceDiff<T> {
    let mut diff = SliceDiff::default();
    for item in new {
        if !old.contains(item) {
            diff.added.push(item.clone());
        }
    }
    for item in old {
        if !new.contains(item) {
            diff.removed.push(item.clone());
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn map(entries: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_diff_keyed_basic() {
        let old = map(&[("0_0", json!({"m": "a"})), ("0_1", json!({"m": "b"}))]);
        let new = map(&[("0_0", json!({"m": "a"})), ("1_0", json!({"m": "c"}))]);

        let diff = diff_keyed(&old, &new);
        assert_eq!(diff.added, vec![("1_0".to_string(), json!({"m": "c"}))]);
        assert_eq!(diff.removed, vec!["0_1".to_string()]);
    }

    #[test]
    fn test_diff_keyed_changed_value_is_added() {
        let old = map(&[("0_0", json!({"m": "a"}))]);
        let new = map(&[("0_0", json!({"m": "A"}))]);

        let diff = diff_keyed(&old, &new);
        assert_eq!(diff.added.len(), 1);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_diff_keyed_identity_is_empty() {
        let snapshot = map(&[
            ("0_0", json!({"m": "a"})),
            ("3_7", json!({"m": "b", "v": 2})),
        ]);
        assert!(diff_keyed(&snapshot, &snapshot).is_empty());
        assert!(diff_keyed::<serde_json::Value>(&HashMap::new(), &HashMap::new()).is_empty());
    }

    /// added ∪ removed ∪ unchanged partitions the key union exactly.
    #[test]
    fn test_diff_keyed_partitions_key_union() {
        let old = map(&[
            ("a", json!(1)),
            ("b", json!(2)),
            ("c", json!(3)),
        ]);
        let new = map(&[
            ("b", json!(2)),
            ("c", json!(30)),
            ("d", json!(4)),
        ]);

        let diff = diff_keyed(&old, &new);
        let added: HashSet<&str> = diff.added.iter().map(|(k, _)| k.as_str()).collect();
        let removed: HashSet<&str> = diff.removed.iter().map(|k| k.as_str()).collect();
        let union: HashSet<&str> = old.keys().chain(new.keys()).map(|k| k.as_str()).collect();
        let unchanged: HashSet<&str> = union
            .iter()
            .copied()
            .filter(|k| !added.contains(k) && !removed.contains(k))
            .collect();

        assert!(added.is_disjoint(&removed));
        assert!(added.is_disjoint(&unchanged));
        assert!(removed.is_disjoint(&unchanged));
        let mut rebuilt: HashSet<&str> = HashSet::new();
        rebuilt.extend(&added);
        rebuilt.extend(&removed);
        rebuilt.extend(&unchanged);
        assert_eq!(rebuilt, union);
        assert_eq!(unchanged, HashSet::from(["b"]));
    }

    #[test]
    fn test_diff_slices_with_key() {
        #[derive(Debug, Clone, PartialEq)]
        struct Entry {
            key: &'static str,
            value: i64,
        }
        let old = vec![Entry { key: "a", value: 1 }, Entry { key: "b", value: 2 }];
        let new = vec![Entry { key: "b", value: 20 }, Entry { key: "c", value: 3 }];

        let diff = diff_slices(&old, &new, |e| e.key);
        assert_eq!(diff.added, vec![Entry { key: "c", value: 3 }]);
        assert_eq!(diff.removed, vec![Entry { key: "a", value: 1 }]);
        assert_eq!(diff.updated, vec![Entry { key: "b", value: 20 }]);
    }

    #[test]
    fn test_diff_slices_by_value() {
        let old = vec![json!(1), json!(2)];
        let new = vec![json!(2), json!(3)];

        let diff = diff_slices_by_value(&old, &new);
        assert_eq!(diff.added, vec![json!(3)]);
        assert_eq!(diff.removed, vec![json!(1)]);
        assert!(diff.updated.is_empty());
    }
}
