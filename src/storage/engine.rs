use crate::core::{RowIdentifier, StoreResult};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Durable operation kinds the commit pipeline can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOperation::Insert => write!(f, "INSERT"),
            StoreOperation::Update => write!(f, "UPDATE"),
            StoreOperation::Delete => write!(f, "DELETE"),
        }
    }
}

/// Pluggable key-value store consumed by the commit pipeline.
///
/// One call performs one durable operation against one row. Insert and Update
/// carry a serialized payload; Delete carries none. Implementations must
/// report `StoreError::WriteConflict` for Insert on an existing row and
/// `StoreError::RecordNotFound` for Update/Delete on an absent row; the
/// pipeline relies on those kinds to detect scheduler contract violations.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn execute(
        &self,
        op: StoreOperation,
        row: RowIdentifier,
        payload: Option<Vec<u8>>,
        timeout: Duration,
    ) -> StoreResult<()>;
}
