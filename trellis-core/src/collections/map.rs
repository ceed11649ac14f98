//! A hash map with per-key tracking.

use std::cell::{Cell as Flag, RefCell};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use crate::error::Result;
use crate::reactive::{Cell, Runtime};

/// Vacant entries tolerated beyond twice the number of live keys before the
/// next write prunes the ones nobody reads any more.
const VACANT_SLACK: usize = 16;

struct Entry<V> {
    value: Option<V>,
    /// Bumped whenever this key's value appears, changes, or disappears.
    marker: Cell<()>,
}

impl<V> Entry<V> {
    fn vacant() -> Self {
        Self {
            value: None,
            marker: Cell::always_dirty(Some(())),
        }
    }

    /// A vacant entry whose marker no reader holds any more.
    fn is_abandoned(&self) -> bool {
        self.value.is_none() && !self.marker.is_shared()
    }
}

struct MapInner<K, V> {
    entries: RefCell<IndexMap<K, Entry<V>>>,
    structure: Cell<()>,
    len: Flag<usize>,
}

/// An insertion-ordered map whose reads are tracked per key.
///
/// Reading a key that is absent during a tracked evaluation still entangles
/// the reader with that key, so a later insert of it invalidates the reader.
/// Such reads leave a vacant entry behind, which is not counted by
/// [`len`](TrackedMap::len) or listed by [`keys`](TrackedMap::keys). Vacant
/// entries are dropped by later writes once no computation depends on them.
/// Untracked reads of absent keys leave nothing behind.
///
/// Cloning the map clones the handle.
pub struct TrackedMap<K, V> {
    inner: Rc<MapInner<K, V>>,
}

impl<K, V> TrackedMap<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: PartialEq + Clone + 'static,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(MapInner {
                entries: RefCell::new(IndexMap::new()),
                structure: Cell::always_dirty(Some(())),
                len: Flag::new(0),
            }),
        }
    }

    /// The marker for `key`. Absent keys only get one while tracking, since
    /// nobody else could ever hold it.
    fn marker(&self, key: &K) -> Option<Cell<()>> {
        if let Some(entry) = self.inner.entries.borrow().get(key) {
            return Some(entry.marker.clone());
        }
        if !Runtime::is_tracking() {
            return None;
        }
        let entry = Entry::vacant();
        let marker = entry.marker.clone();
        self.inner.entries.borrow_mut().insert(key.clone(), entry);
        Some(marker)
    }

    fn read_key(&self, key: &K) -> Result<()> {
        match self.marker(key) {
            Some(marker) => marker.get(),
            None => Ok(()),
        }
    }

    fn touch_structure(&self) {
        self.inner.structure.set(());
    }

    /// Drop vacant entries nobody reads, once they outnumber live keys.
    fn prune(&self) {
        let mut entries = self.inner.entries.borrow_mut();
        if entries.len() < 2 * self.inner.len.get() + VACANT_SLACK {
            return;
        }
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_abandoned());
        trace!(pruned = before - entries.len(), "pruned vacant map entries");
    }

    /// Get the value for `key`, registering a read of that key only.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.read_key(key)?;
        Ok(self
            .inner
            .entries
            .borrow()
            .get(key)
            .and_then(|entry| entry.value.clone()))
    }

    /// Whether `key` holds a value, registering a read of that key only.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.read_key(key)?;
        Ok(self
            .inner
            .entries
            .borrow()
            .get(key)
            .is_some_and(|entry| entry.value.is_some()))
    }

    /// Insert a value, returning the previous one.
    ///
    /// Writing a value equal to the current one changes nothing. Inserting a
    /// new key also invalidates readers of the key set.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let (previous, marker) = {
            let mut entries = self.inner.entries.borrow_mut();
            let entry = entries.entry(key).or_insert_with(Entry::vacant);
            if entry.value.as_ref() == Some(&value) {
                trace!("stable map write ignored");
                return entry.value.clone();
            }
            (entry.value.replace(value), entry.marker.clone())
        };

        marker.set(());
        if previous.is_none() {
            self.inner.len.set(self.inner.len.get() + 1);
            self.touch_structure();
        }
        self.prune();
        previous
    }

    /// Remove a key, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let entry = self.inner.entries.borrow_mut().shift_remove(key)?;
        // Readers of this key hold the old marker; bumping it is what tells
        // them the key is gone.
        entry.marker.set(());
        let value = entry.value?;
        self.inner.len.set(self.inner.len.get() - 1);
        self.touch_structure();
        self.prune();
        Some(value)
    }

    /// Number of keys holding a value, registering a structural read.
    pub fn len(&self) -> Result<usize> {
        self.inner.structure.get()?;
        Ok(self.inner.len.get())
    }

    /// Whether the map holds no values, registering a structural read.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Keys holding a value, in insertion order, registering a structural
    /// read.
    pub fn keys(&self) -> Result<Vec<K>> {
        self.inner.structure.get()?;
        Ok(self
            .inner
            .entries
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.value.is_some())
            .map(|(key, _)| key.clone())
            .collect())
    }
}

impl<K, V> Default for TrackedMap<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: PartialEq + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TrackedMap<K, V> {
    /// Number of entries held, vacant ones included.
    fn entry_count(&self) -> usize {
        self.inner.entries.borrow().len()
    }
}

impl<K, V> Clone for TrackedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for TrackedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedMap")
            .field("len", &self.inner.len.get())
            .field("entries", &self.entry_count())
            .field("structure_revision", &self.inner.structure.revision())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Computation, Runtime};

    fn counted<T, F>(calls: &Rc<Flag<u32>>, f: F) -> Computation<T>
    where
        T: PartialEq + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        let calls = calls.clone();
        Computation::new(move || {
            calls.set(calls.get() + 1);
            f()
        })
    }

    #[test]
    fn insert_get_remove() {
        let map = TrackedMap::new();
        assert_eq!(map.insert("a", 1), None);
        assert_eq!(map.insert("a", 2), Some(1));

        assert_eq!(map.get(&"a").unwrap(), Some(2));
        assert!(map.contains_key(&"a").unwrap());
        assert_eq!(map.len().unwrap(), 1);

        assert_eq!(map.remove(&"a"), Some(2));
        assert_eq!(map.remove(&"a"), None);
        assert!(map.is_empty().unwrap());
    }

    #[test]
    fn per_key_reads_are_isolated() {
        let map = TrackedMap::new();
        map.insert("a", 1);
        map.insert("b", 2);

        let calls = Rc::new(Flag::new(0));
        let reader = counted(&calls, {
            let map = map.clone();
            move || map.get(&"b")
        });

        assert_eq!(reader.get().unwrap(), Some(2));
        map.insert("a", 10);
        map.insert("c", 3);
        assert_eq!(reader.get().unwrap(), Some(2));
        assert_eq!(calls.get(), 1);

        map.insert("b", 20);
        assert_eq!(reader.get().unwrap(), Some(20));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn stable_insert_does_not_invalidate() {
        let map = TrackedMap::new();
        map.insert(1, "x".to_string());

        let calls = Rc::new(Flag::new(0));
        let reader = counted(&calls, {
            let map = map.clone();
            move || map.get(&1)
        });

        reader.get().unwrap();
        map.insert(1, "x".to_string());
        reader.get().unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn reading_absent_key_sees_later_insert() {
        let map: TrackedMap<&str, i32> = TrackedMap::new();
        let reader = Computation::new({
            let map = map.clone();
            move || map.get(&"late")
        });

        assert_eq!(reader.get().unwrap(), None);
        map.insert("late", 5);
        assert_eq!(reader.get().unwrap(), Some(5));

        // The vacant entry left by the first read is not a real key.
        assert_eq!(map.len().unwrap(), 1);
    }

    #[test]
    fn untracked_reads_of_absent_keys_leave_nothing() {
        let map: TrackedMap<u32, u32> = TrackedMap::new();
        for key in 0..1000 {
            assert_eq!(map.get(&key).unwrap(), None);
            assert!(!map.contains_key(&key).unwrap());
        }
        assert_eq!(map.entry_count(), 0);
    }

    #[test]
    fn abandoned_vacant_entries_are_pruned() {
        let map: TrackedMap<u32, u32> = TrackedMap::new();
        for key in 0..100 {
            let reader = Computation::new({
                let map = map.clone();
                move || map.get(&key)
            });
            reader.get().unwrap();
        }
        assert_eq!(map.entry_count(), 100);

        // A reader still alive keeps its vacant entry.
        let kept = Computation::new({
            let map = map.clone();
            move || map.get(&500)
        });
        assert_eq!(kept.get().unwrap(), None);

        map.insert(1000, 1);
        assert_eq!(map.entry_count(), 2);

        map.insert(500, 5);
        assert_eq!(kept.get().unwrap(), Some(5));
    }

    /// Equal whenever the numbers match, whatever the label says.
    #[derive(Debug, Clone)]
    struct Labelled(u32, &'static str);

    impl PartialEq for Labelled {
        fn eq(&self, other: &Self) -> bool {
            self.0 == other.0
        }
    }

    #[test]
    fn stable_insert_returns_stored_value() {
        let map = TrackedMap::new();
        map.insert("k", Labelled(1, "stored"));

        let previous = map.insert("k", Labelled(1, "argument"));
        assert_eq!(previous.map(|value| value.1), Some("stored"));
        assert_eq!(map.get(&"k").unwrap().map(|value| value.1), Some("stored"));
    }

    #[test]
    fn removal_invalidates_key_readers() {
        let map = TrackedMap::new();
        map.insert("k", 1);
        let reader = Computation::new({
            let map = map.clone();
            move || map.contains_key(&"k")
        });

        assert!(reader.get().unwrap());
        map.remove(&"k");
        assert!(!reader.get().unwrap());
    }

    #[test]
    fn structural_readers_see_inserts_and_removes() {
        let map = TrackedMap::new();
        let calls = Rc::new(Flag::new(0));
        let keys = counted(&calls, {
            let map = map.clone();
            move || map.keys()
        });

        assert!(keys.get().unwrap().is_empty());

        map.insert("a", 1);
        map.insert("b", 2);
        assert_eq!(keys.get().unwrap(), vec!["a", "b"]);
        assert_eq!(calls.get(), 2);

        // Value writes leave the key set alone.
        map.insert("a", 5);
        keys.get().unwrap();
        assert_eq!(calls.get(), 2);

        map.remove(&"a");
        assert_eq!(keys.get().unwrap(), vec!["b"]);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn reads_register_map_cells() {
        let map = TrackedMap::new();
        map.insert(1, 1);

        let (_, reads) = Runtime::run_tracked(|| map.get(&1)).unwrap();
        assert_eq!(reads.len(), 1);

        let (_, reads) = Runtime::run_tracked(|| map.len()).unwrap();
        assert_eq!(reads.len(), 1);
    }
}
