// ============================================================================
// FM Message State
// ============================================================================
//
// Tracks which notification (if any) still needs to reach the Failover
// Manager for one entity. Mutated only while that entity's write lock is
// held; the resend side effects go through the deferred action queue so they
// never race in-memory state, and the embedded RetryState invalidates
// in-flight retries whenever the stage moves.
//
// ============================================================================

use crate::core::EntityKey;
use crate::job::{ActionContext, JobContext, StateMachineAction, StateMachineActionQueue};
use crate::retry::{LinearRetryPolicy, RetryState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_FM_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Pending-notification stage toward the Failover Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FmMessageStage {
    /// Nothing pending.
    None,
    /// A new endpoint must be published.
    EndpointAvailable,
    /// A replica-down notification is unacknowledged.
    ReplicaDown,
    /// The FM acknowledged the down notification.
    ReplicaDownAcknowledged,
    /// A replica-up notification is unacknowledged.
    ReplicaUp,
    /// A replica-dropped notification is unacknowledged.
    ReplicaDropped,
    /// The node-startup replica upload has not been acknowledged.
    ReplicaUploadPending,
}

impl fmt::Display for FmMessageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FmMessageStage::None => "None",
            FmMessageStage::EndpointAvailable => "EndpointAvailable",
            FmMessageStage::ReplicaDown => "ReplicaDown",
            FmMessageStage::ReplicaDownAcknowledged => "ReplicaDownAcknowledged",
            FmMessageStage::ReplicaUp => "ReplicaUp",
            FmMessageStage::ReplicaDropped => "ReplicaDropped",
            FmMessageStage::ReplicaUploadPending => "ReplicaUploadPending",
        };
        write!(f, "{name}")
    }
}

/// Receiver of the deferred retry side effects: the outer agent's resend
/// scheduler in production, a recorder in tests.
pub trait FmRetrySignal: Send + Sync {
    fn request_retry(&self, key: &EntityKey, stage: FmMessageStage);
    fn cancel_retry(&self, key: &EntityKey);
}

struct RequestFmRetryAction {
    stage: FmMessageStage,
    signal: Arc<dyn FmRetrySignal>,
}

#[async_trait]
impl<T: Send + Sync> StateMachineAction<T> for RequestFmRetryAction {
    fn name(&self) -> &'static str {
        "fm.request_retry"
    }

    async fn perform(&self, ctx: &ActionContext<T>) {
        self.signal.request_retry(&ctx.key, self.stage);
    }
}

struct CancelFmRetryAction {
    signal: Arc<dyn FmRetrySignal>,
}

#[async_trait]
impl<T: Send + Sync> StateMachineAction<T> for CancelFmRetryAction {
    fn name(&self) -> &'static str {
        "fm.cancel_retry"
    }

    async fn perform(&self, ctx: &ActionContext<T>) {
        self.signal.cancel_retry(&ctx.key);
    }
}

/// Action sink the transition methods write through: the current lock
/// session's action queue plus the resend scheduler.
pub struct FmEffects<'a, T> {
    actions: &'a mut StateMachineActionQueue<T>,
    signal: Arc<dyn FmRetrySignal>,
}

impl<'a, T: Send + Sync + 'static> FmEffects<'a, T> {
    pub fn new(actions: &'a mut StateMachineActionQueue<T>, signal: Arc<dyn FmRetrySignal>) -> Self {
        Self { actions, signal }
    }

    pub fn from_job(ctx: &'a mut JobContext<T>, signal: Arc<dyn FmRetrySignal>) -> Self {
        Self::new(ctx.actions_mut(), signal)
    }

    fn request_retry(&mut self, stage: FmMessageStage) {
        self.actions.enqueue(Box::new(RequestFmRetryAction {
            stage,
            signal: Arc::clone(&self.signal),
        }));
    }

    fn cancel_retry(&mut self) {
        self.actions.enqueue(Box::new(CancelFmRetryAction {
            signal: Arc::clone(&self.signal),
        }));
    }
}

/// Per-entity FM notification state machine.
///
/// Replica instances are tracked only for persisted replicas and only move
/// forward; a lower instance is a caller bug and panics. Duplicate or late
/// notifications that match the current state are silent no-ops. Retry
/// bookkeeping is in-memory only and resets on rehydration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FmMessageState {
    stage: FmMessageStage,
    instance: Option<i64>,
    deleted: bool,
    #[serde(skip, default = "FmMessageState::default_retry")]
    retry: RetryState<LinearRetryPolicy>,
}

impl FmMessageState {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_FM_RETRY_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            stage: FmMessageStage::None,
            instance: None,
            deleted: false,
            retry: RetryState::new(LinearRetryPolicy::new(interval)),
        }
    }

    fn default_retry() -> RetryState<LinearRetryPolicy> {
        RetryState::new(LinearRetryPolicy::new(DEFAULT_FM_RETRY_INTERVAL))
    }

    pub fn stage(&self) -> FmMessageStage {
        self.stage
    }

    /// Replica instance of the pending notification, tracked for persisted
    /// replicas only.
    pub fn instance(&self) -> Option<i64> {
        self.instance
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// An endpoint update needs to be published.
    pub fn mark_endpoint_update_pending<T: Send + Sync + 'static>(
        &mut self,
        effects: &mut FmEffects<'_, T>,
    ) {
        match self.stage {
            FmMessageStage::None => self.transition(FmMessageStage::EndpointAvailable, effects),
            // A stronger pending notification subsumes the endpoint update.
            _ => debug!(stage = %self.stage, "endpoint update subsumed by pending stage"),
        }
    }

    /// A replica went down. `instance` is meaningful only for persisted
    /// replicas; volatile replicas carry no instance.
    pub fn on_replica_down<T: Send + Sync + 'static>(
        &mut self,
        is_persisted: bool,
        instance: i64,
        effects: &mut FmEffects<'_, T>,
    ) {
        let tracked = is_persisted.then_some(instance);
        if let (Some(new), Some(current)) = (tracked, self.instance) {
            assert!(
                new >= current,
                "replica instance moved backwards: {new} < {current}"
            );
        }

        match self.stage {
            FmMessageStage::None | FmMessageStage::EndpointAvailable | FmMessageStage::ReplicaUp => {
                self.instance = tracked;
                self.transition(FmMessageStage::ReplicaDown, effects);
            }
            FmMessageStage::ReplicaDown | FmMessageStage::ReplicaDownAcknowledged => {
                match (tracked, self.instance) {
                    // Same instance again: duplicate notification.
                    (Some(new), Some(current)) if new == current => {
                        debug!(stage = %self.stage, instance = new, "duplicate replica down");
                    }
                    (Some(new), _) => {
                        self.instance = Some(new);
                        self.transition(FmMessageStage::ReplicaDown, effects);
                    }
                    (None, _) => {
                        if self.stage == FmMessageStage::ReplicaDown {
                            debug!("duplicate volatile replica down");
                        } else {
                            self.transition(FmMessageStage::ReplicaDown, effects);
                        }
                    }
                }
            }
            FmMessageStage::ReplicaDropped => {
                debug!("replica down ignored, drop already pending");
            }
            FmMessageStage::ReplicaUploadPending => {
                panic!("replica down while upload is pending");
            }
        }
    }

    /// The FM acknowledged a replica-down notification carrying `instance`.
    /// A mismatched instance is a stale reply and is ignored.
    pub fn on_replica_down_reply<T: Send + Sync + 'static>(
        &mut self,
        instance: i64,
        effects: &mut FmEffects<'_, T>,
    ) {
        match self.stage {
            FmMessageStage::ReplicaDown => {
                let matches = self.instance.is_none_or(|current| current == instance);
                if matches {
                    self.transition(FmMessageStage::ReplicaDownAcknowledged, effects);
                } else {
                    debug!(
                        instance,
                        current = ?self.instance,
                        "stale replica down reply ignored"
                    );
                }
            }
            _ => debug!(stage = %self.stage, "late replica down reply ignored"),
        }
    }

    /// The replica came back up; the tracked instance is cleared.
    pub fn on_replica_up<T: Send + Sync + 'static>(&mut self, effects: &mut FmEffects<'_, T>) {
        match self.stage {
            FmMessageStage::ReplicaDown | FmMessageStage::ReplicaDownAcknowledged => {
                self.instance = None;
                self.transition(FmMessageStage::ReplicaUp, effects);
            }
            _ => debug!(stage = %self.stage, "replica up ignored"),
        }
    }

    /// The replica was dropped from this node.
    pub fn on_dropped<T: Send + Sync + 'static>(&mut self, effects: &mut FmEffects<'_, T>) {
        match self.stage {
            FmMessageStage::ReplicaDropped => debug!("drop already pending"),
            _ => {
                self.instance = None;
                self.transition(FmMessageStage::ReplicaDropped, effects);
            }
        }
    }

    /// The FM acknowledged the dropped notification.
    pub fn on_replica_dropped_reply<T: Send + Sync + 'static>(
        &mut self,
        effects: &mut FmEffects<'_, T>,
    ) {
        match self.stage {
            FmMessageStage::ReplicaDropped => self.transition(FmMessageStage::None, effects),
            _ => debug!(stage = %self.stage, "late replica dropped reply ignored"),
        }
    }

    /// The node-startup upload of this replica is pending.
    ///
    /// # Panics
    /// Panics if any notification (including another upload) is already
    /// pending: upload marking is legal exactly once, from a quiet state.
    pub fn on_last_replica_up_pending<T: Send + Sync + 'static>(
        &mut self,
        effects: &mut FmEffects<'_, T>,
    ) {
        assert!(
            self.stage == FmMessageStage::None,
            "replica upload marked pending while stage is {}",
            self.stage
        );
        // The tracked instance is informational here and survives the upload
        // round trip.
        self.transition(FmMessageStage::ReplicaUploadPending, effects);
    }

    /// The FM acknowledged the startup upload. The instance, if any, is
    /// preserved.
    pub fn on_last_replica_up_acknowledged<T: Send + Sync + 'static>(
        &mut self,
        effects: &mut FmEffects<'_, T>,
    ) {
        match self.stage {
            FmMessageStage::ReplicaUploadPending => self.transition(FmMessageStage::None, effects),
            _ => debug!(stage = %self.stage, "late upload acknowledgement ignored"),
        }
    }

    /// The entity was deleted; nothing further will be sent for it.
    pub fn on_deleted<T: Send + Sync + 'static>(&mut self, effects: &mut FmEffects<'_, T>) {
        debug!(stage = %self.stage, "fm message state cleared for deleted entity");
        self.deleted = true;
        self.clear(effects);
    }

    /// Drop any pending notification. When the entity itself is marked for
    /// delete this is classified as a deletion instead of a plain reset; the
    /// resulting state is identical.
    pub fn reset<T: Send + Sync + 'static>(
        &mut self,
        entity_marked_for_delete: bool,
        effects: &mut FmEffects<'_, T>,
    ) {
        if entity_marked_for_delete {
            self.on_deleted(effects);
        } else {
            debug!(stage = %self.stage, "fm message state reset");
            self.clear(effects);
        }
    }

    /// Sequence number to attach to a resend attempt, if one is due now.
    pub fn should_retry(&self, now: Instant) -> Option<i64> {
        if self.stage == FmMessageStage::None {
            return None;
        }
        self.retry.should_retry(now)
    }

    /// Record a resend attempt. Returns false and changes nothing for a stale
    /// sequence number.
    pub fn on_retry(&mut self, sequence: i64, now: Instant) -> bool {
        self.retry.on_retry(sequence, now)
    }

    fn clear<T: Send + Sync + 'static>(&mut self, effects: &mut FmEffects<'_, T>) {
        self.instance = None;
        if self.stage != FmMessageStage::None {
            self.transition(FmMessageStage::None, effects);
        } else {
            self.retry.finish();
        }
    }

    fn transition<T: Send + Sync + 'static>(
        &mut self,
        next: FmMessageStage,
        effects: &mut FmEffects<'_, T>,
    ) {
        let prev = self.stage;
        self.stage = next;
        if next == FmMessageStage::None {
            self.retry.finish();
            effects.cancel_retry();
        } else {
            // Bumping the sequence makes any in-flight retry against the old
            // stage stale.
            self.retry.start();
            effects.request_retry(next);
        }
        debug!(%prev, %next, instance = ?self.instance, "fm message stage transition");
    }
}

impl Default for FmMessageState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FmMessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.deleted && self.stage == FmMessageStage::None {
            return write!(f, "Deleted");
        }
        match self.instance {
            Some(instance) => write!(f, "{}({instance})", self.stage),
            None => write!(f, "{}", self.stage),
        }
    }
}
