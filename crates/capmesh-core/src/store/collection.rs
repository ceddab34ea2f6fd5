// ── Generic reactive keyed collection ──
//
// Concurrent storage with O(1) lookups and a key-ordered snapshot held in
// a `watch` cell, so readers iterate deterministically without locking.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A concurrent, reactive collection of one value type.
///
/// Every mutation rebuilds the key-ordered snapshot.
pub(crate) struct KeyedCollection<K, T>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    by_key: DashMap<K, Arc<T>>,

    /// Key-ordered snapshot, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<K, T> KeyedCollection<K, T>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_key: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: K, value: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(value)).is_none();
        self.rebuild_snapshot();
        is_new
    }

    pub(crate) fn remove(&self, key: &K) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
        }
        removed
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.by_key.contains_key(key)
    }

    /// Current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn clear(&self) {
        self.by_key.clear();
        self.rebuild_snapshot();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let mut entries: Vec<(K, Arc<T>)> = self
            .by_key
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn upsert_reports_new_keys() {
        let col: KeyedCollection<String, u32> = KeyedCollection::new();
        assert!(col.upsert("a".into(), 1));
        assert!(!col.upsert("a".into(), 2));
        assert_eq!(*col.get(&"a".to_owned()).unwrap(), 2);
        assert_eq!(col.snapshot().len(), 1);
    }

    #[test]
    fn snapshot_is_key_ordered() {
        let col: KeyedCollection<String, &'static str> = KeyedCollection::new();
        col.upsert("c".into(), "third");
        col.upsert("a".into(), "first");
        col.upsert("b".into(), "second");
        let snap: Vec<&str> = col.snapshot().iter().map(|v| **v).collect();
        assert_eq!(snap, vec!["first", "second", "third"]);
    }

    #[test]
    fn remove_and_clear() {
        let col: KeyedCollection<String, u32> = KeyedCollection::new();
        col.upsert("a".into(), 1);
        col.upsert("b".into(), 2);
        assert_eq!(*col.remove(&"a".to_owned()).unwrap(), 1);
        assert!(col.remove(&"a".to_owned()).is_none());
        assert!(!col.contains(&"a".to_owned()));
        assert_eq!(col.len(), 1);

        col.clear();
        assert!(col.snapshot().is_empty());
    }
}
