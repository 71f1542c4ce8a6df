// ============================================================================
// In-Memory Store
// ============================================================================

use super::engine::{PersistentStore, StoreOperation};
use crate::core::{RowIdentifier, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Reference store implementation backed by a row map.
///
/// Enforces the full error taxonomy: WriteConflict on duplicate Insert,
/// RecordNotFound on Update/Delete of an absent row, ObjectClosed once
/// `close` has been called.
pub struct InMemoryStore {
    rows: RwLock<HashMap<RowIdentifier, Vec<u8>>>,
    closed: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Reject all further operations with ObjectClosed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub async fn row_count(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn contains(&self, row: &RowIdentifier) -> bool {
        self.rows.read().await.contains_key(row)
    }

    pub async fn get(&self, row: &RowIdentifier) -> Option<Vec<u8>> {
        self.rows.read().await.get(row).cloned()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn execute(
        &self,
        op: StoreOperation,
        row: RowIdentifier,
        payload: Option<Vec<u8>>,
        _timeout: Duration,
    ) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::ObjectClosed);
        }

        let mut rows = self.rows.write().await;
        debug!(%op, %row, "store operation");

        match op {
            StoreOperation::Insert => {
                if rows.contains_key(&row) {
                    return Err(StoreError::WriteConflict);
                }
                rows.insert(row, payload.unwrap_or_default());
            }
            StoreOperation::Update => {
                if !rows.contains_key(&row) {
                    return Err(StoreError::RecordNotFound);
                }
                rows.insert(row, payload.unwrap_or_default());
            }
            StoreOperation::Delete => {
                if rows.remove(&row).is_none() {
                    return Err(StoreError::RecordNotFound);
                }
            }
        }

        Ok(())
    }
}
