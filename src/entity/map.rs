// ============================================================================
// Entity Map
// ============================================================================

use super::entry::EntityEntry;
use super::handle::ReadOnlyLockedEntityHandle;
use crate::core::{EntityKey, RowIdentifier, RowType};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Key -> entry registry for one entity type.
///
/// Entries are created on first reference and never physically removed while
/// handles may still reference them; a Deleted entry stays in the map as a
/// tombstone that keeps further job items inert.
pub struct EntityMap<T> {
    row_type: RowType,
    entries: RwLock<HashMap<EntityKey, Arc<EntityEntry<T>>>>,
}

impl<T> EntityMap<T> {
    pub fn new(row_type: RowType) -> Self {
        Self {
            row_type,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn row_type(&self) -> RowType {
        self.row_type
    }

    /// Store address of the given entity.
    pub fn row_for(&self, key: &EntityKey) -> RowIdentifier {
        RowIdentifier::new(self.row_type, key.as_str())
    }

    /// Look up an entry, creating it in the Created state if absent.
    pub fn get_or_create(&self, key: &EntityKey) -> Arc<EntityEntry<T>> {
        if let Some(entry) = self.get_entry(key) {
            return entry;
        }
        let mut entries = self.entries.write().expect("entity map poisoned");
        Arc::clone(entries.entry(key.clone()).or_insert_with(|| {
            debug!(%key, row_type = %self.row_type, "creating entity entry");
            EntityEntry::new(key.clone())
        }))
    }

    /// Non-creating lookup.
    pub fn get_entry(&self, key: &EntityKey) -> Option<Arc<EntityEntry<T>>> {
        self.entries
            .read()
            .expect("entity map poisoned")
            .get(key)
            .cloned()
    }

    /// Point-in-time snapshot of the entry set. Values are read through the
    /// entries afterwards, not frozen here.
    pub fn get_all_entries(&self) -> Vec<Arc<EntityEntry<T>>> {
        self.entries
            .read()
            .expect("entity map poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Read-lock filtering: take a read lock on every entry in turn and keep
    /// the keys whose committed state satisfies the predicate.
    pub fn filter_entries<F>(&self, predicate: F) -> Vec<EntityKey>
    where
        F: Fn(&ReadOnlyLockedEntityHandle<T>) -> bool,
    {
        let mut matched = Vec::new();
        for entry in self.get_all_entries() {
            let read = entry.acquire_read();
            if predicate(&read) {
                matched.push(entry.key().clone());
            }
        }
        matched
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("entity map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
