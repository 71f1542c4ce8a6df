// ============================================================================
// Locked Entity Handles
// ============================================================================

use super::commit::{CommitDescription, CommitKind};
use super::entry::{EntityEntry, EntityLifecycle};
use crate::core::EntityKey;
use std::sync::Arc;

/// What a reader observes for an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRead<T> {
    /// No value yet (Created, nothing committed or recorded).
    NotSet,
    Value(Arc<T>),
    Deleted,
}

impl<T> EntityRead<T> {
    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            EntityRead::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, EntityRead::Deleted)
    }
}

/// One recorded mutation intent of a write-lock session.
#[derive(Debug, Clone)]
enum MutationIntent<T> {
    Insert(Arc<T>),
    Update(Arc<T>),
    UpdateInMemory(Arc<T>),
    Delete,
}

/// RAII guard owning an entity's exclusive write access.
///
/// Mutation calls record intents; nothing becomes visible outside the session
/// until the intents are reduced to a CommitDescription and the commit
/// succeeds. Illegal intent sequences are caller bugs and panic:
///
/// - Insert is legal only for an entity that started Created, once per
///   session.
/// - Update / UpdateInMemory / Delete require an Insert this session or an
///   entity that started Inserted.
/// - After Delete, no further mutation is legal.
pub struct LockedEntityHandle<T> {
    entry: Arc<EntityEntry<T>>,
    started: EntityLifecycle,
    base: Option<Arc<T>>,
    intents: Vec<MutationIntent<T>>,
    inserted_this_session: bool,
    deleted_this_session: bool,
}

impl<T> LockedEntityHandle<T> {
    pub(crate) fn new(
        entry: Arc<EntityEntry<T>>,
        started: EntityLifecycle,
        base: Option<Arc<T>>,
    ) -> Self {
        Self {
            entry,
            started,
            base,
            intents: Vec::new(),
            inserted_this_session: false,
            deleted_this_session: false,
        }
    }

    pub fn key(&self) -> &EntityKey {
        self.entry.key()
    }

    /// Lifecycle the entity had when this lock session began.
    pub fn started_lifecycle(&self) -> EntityLifecycle {
        self.started
    }

    pub fn has_intents(&self) -> bool {
        !self.intents.is_empty()
    }

    /// Record an Insert of `value` as the entity's first persisted state.
    pub fn insert(&mut self, value: T) {
        self.assert_not_deleted("insert");
        assert!(
            self.started == EntityLifecycle::Created,
            "insert is only legal for a created entity (entity {} is {:?})",
            self.entry.key(),
            self.started
        );
        assert!(
            !self.inserted_this_session,
            "insert already recorded in this lock session for entity {}",
            self.entry.key()
        );
        self.inserted_this_session = true;
        self.intents.push(MutationIntent::Insert(Arc::new(value)));
    }

    /// Record a persisted Update to `value`.
    pub fn update(&mut self, value: T) {
        self.assert_not_deleted("update");
        self.assert_inserted("update");
        self.intents.push(MutationIntent::Update(Arc::new(value)));
    }

    /// Record an in-memory-only Update to `value`. Does not change the
    /// persisted payload of the eventual commit.
    pub fn update_in_memory(&mut self, value: T) {
        self.assert_not_deleted("update_in_memory");
        self.assert_inserted("update_in_memory");
        self.intents
            .push(MutationIntent::UpdateInMemory(Arc::new(value)));
    }

    /// Record a Delete. Terminal for this session: any later mutation panics.
    pub fn delete(&mut self) {
        self.assert_not_deleted("delete");
        self.assert_inserted("delete");
        self.deleted_this_session = true;
        self.intents.push(MutationIntent::Delete);
    }

    /// Read the entity as of the intents applied so far in this session.
    pub fn current(&self) -> EntityRead<T> {
        if self.started == EntityLifecycle::Deleted || self.deleted_this_session {
            return EntityRead::Deleted;
        }
        let latest = self.intents.iter().rev().find_map(|intent| match intent {
            MutationIntent::Insert(v)
            | MutationIntent::Update(v)
            | MutationIntent::UpdateInMemory(v) => Some(Arc::clone(v)),
            MutationIntent::Delete => None,
        });
        match latest {
            Some(v) => EntityRead::Value(v),
            None => match &self.base {
                Some(v) if self.started == EntityLifecycle::Inserted => {
                    EntityRead::Value(Arc::clone(v))
                }
                _ => EntityRead::NotSet,
            },
        }
    }

    /// Reduce the recorded intents to at most one durable commit.
    ///
    /// `force_update` is the processor's "did update" touch signal: with no
    /// recorded intents it re-commits the current snapshot of an already
    /// inserted entity, and is ignored otherwise.
    pub(crate) fn reduce(&self, force_update: bool) -> Option<CommitDescription<T>> {
        if self.intents.is_empty() {
            if force_update && self.started == EntityLifecycle::Inserted {
                if let Some(base) = &self.base {
                    return Some(CommitDescription {
                        kind: CommitKind::Update,
                        in_memory_only: false,
                        persisted: Some(Arc::clone(base)),
                        in_memory: Some(Arc::clone(base)),
                    });
                }
            }
            return None;
        }

        if self.deleted_this_session {
            // Created -> Delete never reached the store: the whole session
            // degrades to an in-memory discard.
            return Some(CommitDescription {
                kind: CommitKind::Delete,
                in_memory_only: self.started == EntityLifecycle::Created,
                persisted: None,
                in_memory: None,
            });
        }

        let kind = if self.started == EntityLifecycle::Created {
            CommitKind::Insert
        } else {
            CommitKind::Update
        };
        let persisted = self.intents.iter().rev().find_map(|intent| match intent {
            MutationIntent::Insert(v) | MutationIntent::Update(v) => Some(Arc::clone(v)),
            _ => None,
        });
        let in_memory = self.intents.iter().rev().find_map(|intent| match intent {
            MutationIntent::Insert(v)
            | MutationIntent::Update(v)
            | MutationIntent::UpdateInMemory(v) => Some(Arc::clone(v)),
            MutationIntent::Delete => None,
        });

        Some(CommitDescription {
            kind,
            in_memory_only: persisted.is_none(),
            persisted,
            in_memory,
        })
    }

    fn assert_not_deleted(&self, operation: &str) {
        assert!(
            !self.deleted_this_session,
            "{operation} after delete in the same lock session for entity {}",
            self.entry.key()
        );
    }

    fn assert_inserted(&self, operation: &str) {
        assert!(
            self.inserted_this_session || self.started == EntityLifecycle::Inserted,
            "{operation} requires an inserted entity (entity {} is {:?})",
            self.entry.key(),
            self.started
        );
    }
}

impl<T> Drop for LockedEntityHandle<T> {
    fn drop(&mut self) {
        self.entry.release_write();
    }
}

/// Read-only lock guard. Observes the committed snapshot as of acquisition;
/// uncommitted intents of a concurrent writer are never visible.
pub struct ReadOnlyLockedEntityHandle<T> {
    entry: Arc<EntityEntry<T>>,
    lifecycle: EntityLifecycle,
    snapshot: Option<Arc<T>>,
}

impl<T> ReadOnlyLockedEntityHandle<T> {
    pub(crate) fn new(
        entry: Arc<EntityEntry<T>>,
        lifecycle: EntityLifecycle,
        snapshot: Option<Arc<T>>,
    ) -> Self {
        Self {
            entry,
            lifecycle,
            snapshot,
        }
    }

    pub fn key(&self) -> &EntityKey {
        self.entry.key()
    }

    pub fn lifecycle(&self) -> EntityLifecycle {
        self.lifecycle
    }

    pub fn value(&self) -> Option<Arc<T>> {
        self.snapshot.clone()
    }

    pub fn read(&self) -> EntityRead<T> {
        if self.lifecycle == EntityLifecycle::Deleted {
            return EntityRead::Deleted;
        }
        match &self.snapshot {
            Some(v) => EntityRead::Value(Arc::clone(v)),
            None => EntityRead::NotSet,
        }
    }
}

impl<T> Drop for ReadOnlyLockedEntityHandle<T> {
    fn drop(&mut self) {
        self.entry.release_read();
    }
}
