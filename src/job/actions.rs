// ============================================================================
// State Machine Action Queue
// ============================================================================
//
// Side effects computed while an entity lock is held must not run until the
// lock is released and the commit outcome is known. Processors enqueue
// actions here; the job item drains the queue afterwards, performed in
// enqueue order on success, cancelled in enqueue order on commit failure.
//
// ============================================================================

use crate::core::{ActivityId, EntityKey};
use crate::entity::EntityLifecycle;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Post-unlock view of the entity an action runs against.
pub struct ActionContext<T> {
    pub key: EntityKey,
    pub activity_id: ActivityId,
    /// Lifecycle after the commit outcome was applied.
    pub lifecycle: EntityLifecycle,
    /// Committed snapshot after the commit outcome was applied.
    pub snapshot: Option<Arc<T>>,
}

/// One deferred side effect. The queue guarantees ordering and
/// performed-vs-cancelled exclusivity; retries are the action's own business.
#[async_trait]
pub trait StateMachineAction<T>: Send {
    fn name(&self) -> &'static str;

    async fn perform(&self, ctx: &ActionContext<T>);

    fn cancel(&self, _ctx: &ActionContext<T>) {}
}

/// Ordered, append-only queue owned by one job item for one lock session.
pub struct StateMachineActionQueue<T> {
    actions: Vec<Box<dyn StateMachineAction<T>>>,
}

impl<T> StateMachineActionQueue<T> {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, action: Box<dyn StateMachineAction<T>>) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) async fn perform_all(mut self, ctx: &ActionContext<T>) {
        for action in self.actions.drain(..) {
            debug!(
                activity_id = %ctx.activity_id,
                key = %ctx.key,
                action = action.name(),
                "performing action"
            );
            action.perform(ctx).await;
        }
    }

    pub(crate) fn cancel_all(mut self, ctx: &ActionContext<T>) {
        for action in self.actions.drain(..) {
            debug!(
                activity_id = %ctx.activity_id,
                key = %ctx.key,
                action = action.name(),
                "cancelling action"
            );
            action.cancel(ctx);
        }
    }
}

impl<T> Default for StateMachineActionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
