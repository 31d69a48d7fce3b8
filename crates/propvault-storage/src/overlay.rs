//! Uncommitted property changes and change detection.
//!
//! The [`Overlay`] holds a full copy of every modified resource's property
//! set, seeded from the baseline on first write. [`compute_changes`] compares
//! an overlay copy with its baseline to report which properties changed.

use std::collections::BTreeSet;

use dashmap::DashMap;

use crate::record::PropertySet;
use crate::types::ResourcePath;

/// Modified property sets keyed by resource path.
#[derive(Debug, Default)]
pub struct Overlay {
    sets: DashMap<ResourcePath, PropertySet>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &ResourcePath) -> Option<PropertySet> {
        self.sets.get(path).map(|set| set.value().clone())
    }

    pub fn contains(&self, path: &ResourcePath) -> bool {
        self.sets.contains_key(path)
    }

    /// Applies `f` to the overlay copy of `path`, creating it from `seed`
    /// first if the resource is not yet modified.
    pub fn update<R>(
        &self,
        path: &ResourcePath,
        seed: impl FnOnce() -> PropertySet,
        f: impl FnOnce(&mut PropertySet) -> R,
    ) -> R {
        let mut entry = self.sets.entry(path.clone()).or_insert_with(seed);
        f(entry.value_mut())
    }

    pub fn remove(&self, path: &ResourcePath) -> Option<PropertySet> {
        self.sets.remove(path).map(|(_, set)| set)
    }

    pub fn clear(&self) {
        self.sets.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Modified paths in sorted order.
    pub fn paths(&self) -> Vec<ResourcePath> {
        let mut paths: Vec<ResourcePath> = self.sets.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

/// The properties that differ between a baseline and a modified set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Properties absent from the baseline.
    pub added: BTreeSet<String>,
    /// Properties whose value differs from the baseline.
    pub modified: BTreeSet<String>,
    /// Baseline properties no longer present.
    pub removed: BTreeSet<String>,
}

impl ChangeSet {
    /// Returns true if nothing changed.
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Total count of changed properties.
    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

/// Compares `current` against `baseline`.
pub fn compute_changes(baseline: &PropertySet, current: &PropertySet) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (name, value) in current {
        match baseline.get(name) {
            Some(previous) if previous == value => {}
            Some(_) => {
                changes.modified.insert(name.clone());
            }
            None => {
                changes.added.insert(name.clone());
            }
        }
    }

    for name in baseline.keys() {
        if !current.contains_key(name) {
            changes.removed.insert(name.clone());
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use propvault_core::Value;

    fn set(entries: &[(&str, Value)]) -> PropertySet {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_clean_when_nothing_changed() {
        let base = set(&[("a", Value::Int(1))]);
        let changes = compute_changes(&base, &base.clone());
        assert!(changes.is_clean());
        assert_eq!(changes.total(), 0);
    }

    #[test]
    fn test_added_modified_removed_detected() {
        let base = set(&[("keep", Value::Int(1)), ("edit", Value::Int(2)), ("drop", Value::Int(3))]);
        let current = set(&[("keep", Value::Int(1)), ("edit", Value::Int(20)), ("new", Value::Bool(true))]);
        let changes = compute_changes(&base, &current);
        assert!(changes.added.contains("new"));
        assert!(changes.modified.contains("edit"));
        assert!(changes.removed.contains("drop"));
        assert_eq!(changes.total(), 3);
    }

    #[test]
    fn test_update_seeds_once() {
        let overlay = Overlay::new();
        let path = ResourcePath::parse("/a").unwrap();
        overlay.update(&path, || set(&[("x", Value::Int(1))]), |s| s.insert("y".into(), Value::Int(2)));
        overlay.update(&path, || panic!("seeded twice"), |s| s.remove("x"));
        let current = overlay.get(&path).unwrap();
        assert_eq!(current.len(), 1);
        assert!(current.contains_key("y"));
    }

    #[test]
    fn test_paths_sorted_and_clear() {
        let overlay = Overlay::new();
        for p in ["/b", "/a/c", "/a"] {
            overlay.update(&ResourcePath::parse(p).unwrap(), PropertySet::new, |_| ());
        }
        let paths: Vec<String> = overlay.paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["/a", "/a/c", "/b"]);
        overlay.clear();
        assert!(overlay.is_empty());
    }
}
