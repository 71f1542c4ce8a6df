use crate::storage::StoreOperation;
use std::sync::Arc;

/// Durable operation kind a lock session reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Insert,
    Update,
    Delete,
}

impl CommitKind {
    pub fn store_operation(&self) -> StoreOperation {
        match self {
            CommitKind::Insert => StoreOperation::Insert,
            CommitKind::Update => StoreOperation::Update,
            CommitKind::Delete => StoreOperation::Delete,
        }
    }
}

/// Reduction of one lock session's mutation intents to exactly one commit.
///
/// `persisted` is the payload written to the store (absent for Delete and for
/// purely in-memory updates); `in_memory` is the snapshot the entity carries
/// after a successful commit. `in_memory_only` marks commits that never touch
/// the store: a Delete of an entity that was never persisted, or an Update
/// whose only mutations were in-memory.
#[derive(Debug, Clone)]
pub struct CommitDescription<T> {
    pub kind: CommitKind,
    pub in_memory_only: bool,
    pub persisted: Option<Arc<T>>,
    pub in_memory: Option<Arc<T>>,
}

impl<T> CommitDescription<T> {
    pub fn requires_store_operation(&self) -> bool {
        !self.in_memory_only
    }
}
