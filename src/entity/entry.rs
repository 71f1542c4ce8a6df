// ============================================================================
// Entity Entry
// ============================================================================
//
// One entry owns one entity's committed snapshot, lifecycle tag and lock
// state. Entries are created by the EntityMap and shared via Arc; all
// mutation flows through a write-locked session and a CommitDescription.
//
// Lifecycle:
// ```text
// Created ──Insert commit──> Inserted ──Delete commit──> Deleted
//    │                                                      ▲
//    └────────────Delete commit (in-memory discard)─────────┘
// ```
// Deleted is terminal for this framework's primitives.
//
// ============================================================================

use super::commit::{CommitDescription, CommitKind};
use super::handle::{LockedEntityHandle, ReadOnlyLockedEntityHandle};
use crate::core::EntityKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Persistence lifecycle of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLifecycle {
    /// Referenced but never committed to the store.
    Created,
    /// Present in the store (or committed purely in memory).
    Inserted,
    /// Removed; inert to further job items.
    Deleted,
}

pub(crate) struct EntryState<T> {
    pub(crate) lifecycle: EntityLifecycle,
    pub(crate) snapshot: Option<Arc<T>>,
    pub(crate) readers: usize,
}

pub struct EntityEntry<T> {
    key: EntityKey,
    state: Mutex<EntryState<T>>,
    write_locked: AtomicBool,
    // Lock handles keep their entry alive; set once at construction.
    weak_self: Weak<EntityEntry<T>>,
}

impl<T> EntityEntry<T> {
    pub(crate) fn new(key: EntityKey) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            key,
            state: Mutex::new(EntryState {
                lifecycle: EntityLifecycle::Created,
                snapshot: None,
                readers: 0,
            }),
            write_locked: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    fn strong_self(&self) -> Arc<Self> {
        self.weak_self
            .upgrade()
            .expect("entity entry accessed outside an Arc")
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn lifecycle(&self) -> EntityLifecycle {
        self.state.lock().expect("entity state poisoned").lifecycle
    }

    /// Last committed snapshot. Uncommitted intents of a held write lock are
    /// never visible here.
    pub fn snapshot(&self) -> Option<Arc<T>> {
        self.state
            .lock()
            .expect("entity state poisoned")
            .snapshot
            .clone()
    }

    /// Acquire the entity's exclusive write lock.
    ///
    /// # Panics
    /// Panics if a write lock is already outstanding. The job queue manager
    /// serializes job items per entity; a second outstanding writer means that
    /// invariant was broken by the caller.
    pub fn acquire_write(&self) -> LockedEntityHandle<T> {
        if self
            .write_locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            panic!("write lock already held for entity {}", self.key);
        }

        let (lifecycle, snapshot) = {
            let state = self.state.lock().expect("entity state poisoned");
            (state.lifecycle, state.snapshot.clone())
        };
        LockedEntityHandle::new(self.strong_self(), lifecycle, snapshot)
    }

    /// Acquire a read-only lock observing the committed snapshot as of
    /// acquisition time.
    pub fn acquire_read(&self) -> ReadOnlyLockedEntityHandle<T> {
        let (lifecycle, snapshot) = {
            let mut state = self.state.lock().expect("entity state poisoned");
            state.readers += 1;
            (state.lifecycle, state.snapshot.clone())
        };
        ReadOnlyLockedEntityHandle::new(self.strong_self(), lifecycle, snapshot)
    }

    /// Apply a successful commit to the committed snapshot and lifecycle.
    /// Called while the write lock is still held, before its release.
    pub(crate) fn apply_commit(&self, description: &CommitDescription<T>) {
        let mut state = self.state.lock().expect("entity state poisoned");
        match description.kind {
            CommitKind::Insert => {
                state.lifecycle = EntityLifecycle::Inserted;
                state.snapshot = description.in_memory.clone();
            }
            CommitKind::Update => {
                state.snapshot = description.in_memory.clone();
            }
            CommitKind::Delete => {
                state.lifecycle = EntityLifecycle::Deleted;
                state.snapshot = None;
            }
        }
        debug!(key = %self.key, kind = ?description.kind, "commit applied");
    }

    pub(crate) fn release_write(&self) {
        let was_locked = self.write_locked.swap(false, Ordering::AcqRel);
        debug_assert!(was_locked, "releasing a write lock that was not held");
    }

    pub(crate) fn release_read(&self) {
        let mut state = self.state.lock().expect("entity state poisoned");
        debug_assert!(state.readers > 0, "releasing a read lock that was not held");
        state.readers = state.readers.saturating_sub(1);
    }
}
