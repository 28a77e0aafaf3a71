//! Insertion-ordered registries with identity-based membership.
//!
//! Every collection the dispatcher iterates during live traffic (components,
//! commands, checks, prefixes, client callbacks) uses this registry so that
//! matching order is deterministic: first registered wins. Membership is
//! keyed by a caller-supplied identity, giving cheap add/remove without the
//! unordered iteration of a hash set.

/// An insertion-ordered collection keyed by a `u64` identity.
#[derive(Debug, Clone)]
pub(crate) struct Registry<T> {
    entries: Vec<(u64, T)>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Registry<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` at the end unless `key` is already present.
    ///
    /// Returns `true` if the value was inserted.
    pub(crate) fn insert(&mut self, key: u64, value: T) -> bool {
        if self.contains(key) {
            return false;
        }
        self.entries.push((key, value));
        true
    }

    /// Removes and returns the value registered under `key`, if any.
    pub(crate) fn remove(&mut self, key: u64) -> Option<T> {
        let pos = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub(crate) fn contains(&self, key: u64) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Clones the values out in registration order.
    ///
    /// Dispatch paths iterate over snapshots so that administrative mutation
    /// concurrent with an in-flight dispatch never invalidates the iteration.
    pub(crate) fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_preserves_order_and_dedupes() {
        let mut registry = Registry::new();
        assert!(registry.insert(1, "a"));
        assert!(registry.insert(2, "b"));
        assert!(!registry.insert(1, "a again"));
        assert_eq!(registry.snapshot(), vec!["a", "b"]);
    }

    #[test]
    fn remove_keeps_remaining_order() {
        let mut registry = Registry::new();
        registry.insert(1, "a");
        registry.insert(2, "b");
        registry.insert(3, "c");
        assert_eq!(registry.remove(2), Some("b"));
        assert_eq!(registry.remove(2), None);
        assert_eq!(registry.snapshot(), vec!["a", "c"]);
        assert_eq!(registry.len(), 2);
    }
}
