//! Bounded snapshot cache for last-known entity state.
//!
//! # Responsibility
//! - Remember field snapshots keyed by (collection, id) so repeated loads
//!   skip the backend.
//! - Remember deletions as tombstones, distinct from "never fetched".
//!
//! # Invariants
//! - Capacity counts total entries across all collections, tombstones
//!   included.
//! - Reaching capacity flushes the entire cache before the new insert; there
//!   is no incremental eviction.
//! - Capacity 0 disables the cache; every operation is a no-op or a miss.
//! - The internal lock is independent of the dispatcher's sections.

use crate::model::{Entity, FieldMap};
use log::debug;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone)]
enum CacheEntry {
    Snapshot(FieldMap),
    Tombstone,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<(String, u64), CacheEntry>,
}

/// Capacity-flushed cache of entity snapshots.
pub struct ItemCache {
    capacity: usize,
    state: RwLock<CacheState>,
}

impl ItemCache {
    /// Creates a cache holding at most `capacity` entries; 0 disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts or overwrites the snapshot for (collection, id).
    ///
    /// Transient entities (id 0) are never cached. When the entry count has
    /// reached capacity the whole cache is flushed first.
    pub fn add(&self, item: &dyn Entity) {
        if self.capacity == 0 || item.id() == 0 {
            return;
        }
        let key = (item.collection_name().to_string(), item.id());
        let snapshot = item.snapshot();
        let mut state = self.write_state();
        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            debug!(
                "event=cache_flush module=cache reason=capacity entries={}",
                state.entries.len()
            );
            state.entries.clear();
        }
        debug!(
            "event=cache_add module=cache collection={} id={}",
            key.0, key.1
        );
        state.entries.insert(key, CacheEntry::Snapshot(snapshot));
    }

    /// Hydrates `target` from the cached snapshot for (collection, id).
    ///
    /// Tombstoned or absent entries are misses and leave `target` untouched.
    pub fn lookup(&self, target: &mut dyn Entity, id: u64) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let key = (target.collection_name().to_string(), id);
        let snapshot = {
            let state = self.read_state();
            match state.entries.get(&key) {
                Some(CacheEntry::Snapshot(snapshot)) => Some(snapshot.clone()),
                Some(CacheEntry::Tombstone) | None => None,
            }
        };
        match snapshot {
            Some(snapshot) => {
                target.fill(id, Some(snapshot));
                debug!(
                    "event=cache_hit module=cache collection={} id={id}",
                    key.0
                );
                true
            }
            None => false,
        }
    }

    /// Replaces an existing entry with a tombstone so the id is remembered
    /// as gone instead of being re-cached from a stale snapshot.
    pub fn remove(&self, item: &dyn Entity) {
        if self.capacity == 0 {
            return;
        }
        let key = (item.collection_name().to_string(), item.id());
        let mut state = self.write_state();
        if let Some(entry) = state.entries.get_mut(&key) {
            debug!(
                "event=cache_tombstone module=cache collection={} id={}",
                key.0, key.1
            );
            *entry = CacheEntry::Tombstone;
        }
    }

    /// Drops every entry, tombstones included.
    pub fn clear(&self) {
        let mut state = self.write_state();
        if !state.entries.is_empty() {
            debug!(
                "event=cache_flush module=cache reason=clear entries={}",
                state.entries.len()
            );
        }
        state.entries.clear();
    }

    /// Current entry count (snapshots plus tombstones).
    pub fn len(&self) -> usize {
        self.read_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::ItemCache;
    use crate::model::record::Record;
    use crate::model::{Collectioned, Entity, FieldMap, FieldValue};

    #[derive(Default)]
    struct Note(Record);

    impl Collectioned for Note {
        fn collection_name(&self) -> &'static str {
            "notes"
        }
    }

    impl Entity for Note {
        fn id(&self) -> u64 {
            self.0.id()
        }
        fn fill(&mut self, id: u64, fields: Option<FieldMap>) {
            self.0.fill(id, fields);
        }
        fn clone_empty(&self) -> Box<dyn Entity> {
            Box::new(Note::default())
        }
        fn field(&self, name: &str) -> Option<FieldValue> {
            self.0.field(name)
        }
        fn set_field(&mut self, name: &str, value: FieldValue) {
            self.0.set_field(name, value);
        }
        fn snapshot(&self) -> FieldMap {
            self.0.snapshot()
        }
    }

    fn note(id: u64, body: &str) -> Note {
        let mut note = Note::default();
        note.fill(id, None);
        note.set_field("body", FieldValue::from(body));
        note
    }

    #[test]
    fn add_then_lookup_hydrates_target() {
        let cache = ItemCache::new(10);
        cache.add(&note(1, "hello"));

        let mut target = Note::default();
        assert!(cache.lookup(&mut target, 1));
        assert_eq!(target.id(), 1);
        assert_eq!(target.field("body"), Some(FieldValue::from("hello")));
    }

    #[test]
    fn tombstone_is_a_miss_but_stays_an_entry() {
        let cache = ItemCache::new(10);
        let item = note(1, "hello");
        cache.add(&item);
        cache.remove(&item);

        let mut target = Note::default();
        assert!(!cache.lookup(&mut target, 1));
        assert_eq!(target.id(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_of_unknown_id_inserts_nothing() {
        let cache = ItemCache::new(10);
        cache.remove(&note(9, "ghost"));
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_reached_flushes_everything_before_insert() {
        let cache = ItemCache::new(2);
        cache.add(&note(1, "a"));
        cache.add(&note(2, "b"));
        assert_eq!(cache.len(), 2);

        cache.add(&note(3, "c"));
        assert_eq!(cache.len(), 1);

        let mut target = Note::default();
        assert!(!cache.lookup(&mut target, 1));
        assert!(cache.lookup(&mut target, 3));
    }

    #[test]
    fn overwrite_does_not_trigger_flush() {
        let cache = ItemCache::new(2);
        cache.add(&note(1, "a"));
        cache.add(&note(2, "b"));
        cache.add(&note(2, "b2"));
        assert_eq!(cache.len(), 2);

        let mut target = Note::default();
        assert!(cache.lookup(&mut target, 1));
        assert!(cache.lookup(&mut target, 2));
        assert_eq!(target.field("body"), Some(FieldValue::from("b2")));
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let cache = ItemCache::new(0);
        cache.add(&note(1, "a"));
        let mut target = Note::default();
        assert!(!cache.lookup(&mut target, 1));
        assert!(cache.is_empty());
    }

    #[test]
    fn transient_entities_are_never_cached() {
        let cache = ItemCache::new(10);
        cache.add(&note(0, "unsaved"));
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_resets_to_empty() {
        let cache = ItemCache::new(10);
        cache.add(&note(1, "a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
