// ============================================================================
// failover-core Library
// ============================================================================
//
// Concurrency and persistence core of a cluster-node failover /
// reconfiguration agent. Independent asynchronous triggers (peer messages,
// timers, local faults) mutate long-lived persisted entities through a
// lock-and-commit protocol:
//
// ```text
// trigger ──> JobItem ──> JobQueueManager (per-entity serialization, gating)
//                │
//                └──> LockedEntityHandle: record intents, enqueue actions
//                         │
//                         └──> CommitDescription ──> PersistentStore
//                                  │
//                                  └──> apply-or-rollback, then drain actions
// ```
//
// ============================================================================

pub mod core;
pub mod entity;
pub mod fm;
pub mod job;
pub mod retry;
pub mod storage;

// Re-export main types for convenience
pub use crate::core::{
    ActivityId, EntityKey, FailoverConfig, FailoverError, FatalHandler, JobGate, NodeLifecycle,
    NodePhase, Result, RowIdentifier, RowType, StoreError,
};
pub use crate::entity::{
    CommitDescription, CommitKind, EntityEntry, EntityLifecycle, EntityMap, EntityRead,
    LockedEntityHandle, ReadOnlyLockedEntityHandle,
};
pub use crate::fm::{FmEffects, FmMessageStage, FmMessageState, FmRetrySignal};
pub use crate::job::{
    ActionContext, JobContext, JobItem, JobOutcome, JobQueueManager, MultipleEntityWork,
    MultipleEntityWorkManager, StateMachineAction, StateMachineActionQueue,
};
pub use crate::retry::{LinearRetryPolicy, RetryPolicy, RetryState};
pub use crate::storage::{FaultInjectionStore, InMemoryStore, PersistentStore, StoreOperation};
