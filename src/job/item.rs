// ============================================================================
// Job Item
// ============================================================================
//
// The unit of scheduled work against one entity. A job item acquires the
// entity's write lock, runs the caller's processor, reduces the recorded
// intents to at most one durable commit, applies it against the persistent
// store, and drains the deferred action queue:
//
// ```text
// Scheduled ──gate──> Skipped
//     │
//     └──> Running ──> NoCommitNeeded ──> actions performed
//              │
//              └──> CommitPending ──success──> committed, actions performed
//                         │
//                         └──failure──> rolled back, actions cancelled
// ```
//
// ============================================================================

use super::actions::{ActionContext, StateMachineAction, StateMachineActionQueue};
use super::multi::MultipleEntityWork;
use super::queue::JobEnv;
use crate::core::{ActivityId, EntityKey, FailoverError, FatalHandler, JobGate, StoreError};
use crate::entity::{CommitDescription, CommitKind, EntityLifecycle, LockedEntityHandle};
use crate::storage::PersistentStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Caller-supplied logic run under the entity's write lock. The boolean
/// return is the "did update" touch signal: it asks for a durable Update of
/// the current snapshot even when no explicit mutation was recorded. It never
/// signals commit success; that is decided by the recorded intents plus the
/// store result.
pub type Processor<T> =
    Box<dyn FnOnce(&mut LockedEntityHandle<T>, &mut JobContext<T>) -> bool + Send>;

/// Per-session context handed to the processor alongside the locked handle.
pub struct JobContext<T> {
    activity_id: ActivityId,
    actions: StateMachineActionQueue<T>,
}

impl<T> JobContext<T> {
    pub(crate) fn new(activity_id: ActivityId) -> Self {
        Self {
            activity_id,
            actions: StateMachineActionQueue::new(),
        }
    }

    pub fn activity_id(&self) -> ActivityId {
        self.activity_id
    }

    /// Defer a side effect until after unlock + commit.
    pub fn enqueue_action(&mut self, action: Box<dyn StateMachineAction<T>>) {
        self.actions.enqueue(action);
    }

    pub fn actions_mut(&mut self) -> &mut StateMachineActionQueue<T> {
        &mut self.actions
    }

    pub(crate) fn into_actions(self) -> StateMachineActionQueue<T> {
        self.actions
    }
}

/// Terminal state of a job item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Gate failed or the owning work was cancelled; processor never ran.
    Skipped,
    /// Target entity was already deleted; processor never ran.
    NoOp,
    Completed { committed: bool },
}

pub struct JobItem<T> {
    key: EntityKey,
    activity_id: ActivityId,
    description: String,
    gate: JobGate,
    fail_fast_on_commit_failure: Option<bool>,
    processor: Processor<T>,
    work: Option<Arc<MultipleEntityWork>>,
}

impl<T> JobItem<T>
where
    T: Serialize + Send + Sync + 'static,
{
    pub fn new<F>(
        key: EntityKey,
        description: impl Into<String>,
        gate: JobGate,
        processor: F,
    ) -> Self
    where
        F: FnOnce(&mut LockedEntityHandle<T>, &mut JobContext<T>) -> bool + Send + 'static,
    {
        Self {
            key,
            activity_id: ActivityId::new(),
            description: description.into(),
            gate,
            fail_fast_on_commit_failure: None,
            processor: Box::new(processor),
            work: None,
        }
    }

    pub fn with_activity_id(mut self, activity_id: ActivityId) -> Self {
        self.activity_id = activity_id;
        self
    }

    /// Override the configured escalation policy for unexpected commit
    /// failures of this item.
    pub fn with_fail_fast_on_commit_failure(mut self, fail_fast: bool) -> Self {
        self.fail_fast_on_commit_failure = Some(fail_fast);
        self
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn activity_id(&self) -> ActivityId {
        self.activity_id
    }

    pub(crate) fn attach_work(&mut self, work: Arc<MultipleEntityWork>) {
        self.work = Some(work);
    }

    pub(crate) async fn run(self, env: &JobEnv<T>) -> JobOutcome {
        let Self {
            key,
            activity_id,
            description,
            gate,
            fail_fast_on_commit_failure,
            processor,
            work,
        } = self;

        let fail_fast =
            fail_fast_on_commit_failure.unwrap_or(env.config.fail_fast_on_commit_failure);

        let outcome = if work.as_ref().is_some_and(|w| w.is_cancelled()) {
            debug!(%activity_id, %key, %description, "owning work cancelled, skipping");
            JobOutcome::Skipped
        } else if !gate.admits(env.node.phase()) {
            debug!(%activity_id, %key, %description, ?gate, "lifecycle gate failed, skipping");
            JobOutcome::Skipped
        } else {
            Self::run_locked(env, &key, activity_id, &description, fail_fast, processor).await
        };

        if let Some(work) = work {
            work.note_completed(&key, outcome);
        }
        outcome
    }

    async fn run_locked(
        env: &JobEnv<T>,
        key: &EntityKey,
        activity_id: ActivityId,
        description: &str,
        fail_fast: bool,
        processor: Processor<T>,
    ) -> JobOutcome {
        let entry = env.map.get_or_create(key);
        if entry.lifecycle() == EntityLifecycle::Deleted {
            debug!(%activity_id, %key, %description, "entity is deleted, job item is inert");
            return JobOutcome::NoOp;
        }

        let mut handle = entry.acquire_write();
        let mut ctx = JobContext::new(activity_id);
        let did_update = processor(&mut handle, &mut ctx);
        let commit = handle.reduce(did_update);
        let actions = ctx.into_actions();

        let committed = match &commit {
            None => true,
            Some(desc) if !desc.requires_store_operation() => true,
            Some(desc) => Self::execute_commit(env, key, activity_id, desc, fail_fast).await,
        };

        if committed {
            if let Some(desc) = &commit {
                entry.apply_commit(desc);
            }
        }
        drop(handle);

        let ctx = ActionContext {
            key: key.clone(),
            activity_id,
            lifecycle: entry.lifecycle(),
            snapshot: entry.snapshot(),
        };
        if committed {
            actions.perform_all(&ctx).await;
        } else {
            actions.cancel_all(&ctx);
        }

        JobOutcome::Completed { committed }
    }

    /// Issue the single durable store operation of a commit. Returns whether
    /// the commit may be applied in memory.
    async fn execute_commit(
        env: &JobEnv<T>,
        key: &EntityKey,
        activity_id: ActivityId,
        commit: &CommitDescription<T>,
        fail_fast: bool,
    ) -> bool {
        let row = env.map.row_for(key);
        let payload = if commit.kind == CommitKind::Delete {
            None
        } else {
            let value = commit
                .persisted
                .as_ref()
                .expect("persisted payload missing for a store-bound commit");
            match Self::encode(value.as_ref()) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!(%activity_id, %key, error = %err, "payload serialization failed, rolling back");
                    return false;
                }
            }
        };

        match env
            .store
            .execute(
                commit.kind.store_operation(),
                row,
                payload,
                env.config.commit_timeout,
            )
            .await
        {
            Ok(()) => {
                debug!(%activity_id, %key, kind = ?commit.kind, "commit succeeded");
                true
            }
            Err(err) if err.is_contract_violation() => {
                panic!(
                    "store reported {err} for {:?} on entity {key}: scheduler invariant violated",
                    commit.kind
                );
            }
            Err(StoreError::GenericFailure) if fail_fast => {
                env.fatal.on_fatal(
                    activity_id,
                    &format!("unexpected commit failure for entity {key}"),
                );
                false
            }
            Err(err) => {
                warn!(%activity_id, %key, error = %err, "commit failed, rolling back");
                false
            }
        }
    }

    fn encode(value: &T) -> crate::core::Result<Vec<u8>> {
        rmp_serde::to_vec(value).map_err(|err| FailoverError::Serialization(err.to_string()))
    }
}
