use crate::core::types::ActivityId;
use thiserror::Error;
use tracing::error;

/// Outcome taxonomy of the persistent store.
///
/// Any replacement store implementation must preserve these kinds verbatim;
/// the commit pipeline classifies them to decide between rollback, fatal
/// escalation, and fail-fast.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("write conflict: row already exists")]
    WriteConflict,

    #[error("record not found")]
    RecordNotFound,

    #[error("store object is closed")]
    ObjectClosed,

    #[error("store is not usable")]
    StoreNotUsable,

    #[error("node is not primary for this row")]
    NotPrimary,

    #[error("store operation failed")]
    GenericFailure,
}

impl StoreError {
    /// Failures that indicate expected shutdown or ownership loss. These are
    /// rolled back quietly and never escalate.
    pub fn is_expected_shutdown(&self) -> bool {
        matches!(
            self,
            StoreError::ObjectClosed | StoreError::StoreNotUsable | StoreError::NotPrimary
        )
    }

    /// Failures that mean the scheduler or caller broke the single-writer /
    /// row-consistency invariant. The pipeline fails fast on these instead of
    /// rolling back.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, StoreError::WriteConflict | StoreError::RecordNotFound)
    }
}

#[derive(Error, Debug)]
pub enum FailoverError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, FailoverError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Sink for unrecoverable inconsistencies detected by the commit pipeline.
///
/// The production handler takes the process down; tests inject a recorder.
pub trait FatalHandler: Send + Sync {
    fn on_fatal(&self, activity_id: ActivityId, message: &str);
}

/// Default handler: log and abort via panic.
pub struct AbortOnFatal;

impl FatalHandler for AbortOnFatal {
    fn on_fatal(&self, activity_id: ActivityId, message: &str) {
        error!(%activity_id, message, "fatal inconsistency, aborting");
        panic!("fatal inconsistency [{activity_id}]: {message}");
    }
}
