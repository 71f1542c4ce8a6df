// ============================================================================
// Multiple Entity Work
// ============================================================================

use super::item::{JobItem, JobOutcome};
use super::queue::JobQueueManager;
use crate::core::{ActivityId, EntityKey};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Callback fired exactly once when the last constituent job item finishes.
/// Receives the keys of the entities the work actually touched.
pub type WorkCompletion = Box<dyn FnOnce(Vec<EntityKey>) + Send>;

/// A group of job items, possibly against distinct entities, sharing one
/// completion callback.
///
/// Constituents may finish in any order on any worker; an atomic
/// decrement-to-zero counter makes completion detection race-free. A work
/// with zero constituents completes immediately on submission.
pub struct MultipleEntityWork {
    description: String,
    activity_id: ActivityId,
    remaining: AtomicUsize,
    cancelled: AtomicBool,
    touched: Mutex<Vec<EntityKey>>,
    completion: Mutex<Option<WorkCompletion>>,
}

impl MultipleEntityWork {
    fn new(
        description: String,
        activity_id: ActivityId,
        constituents: usize,
        completion: WorkCompletion,
    ) -> Self {
        Self {
            description,
            activity_id,
            remaining: AtomicUsize::new(constituents),
            cancelled: AtomicBool::new(false),
            touched: Mutex::new(Vec::new()),
            completion: Mutex::new(Some(completion)),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn activity_id(&self) -> ActivityId {
        self.activity_id
    }

    /// Cooperative cancellation: constituents that have not started are
    /// skipped; in-flight ones run to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn note_completed(&self, key: &EntityKey, outcome: JobOutcome) {
        if outcome != JobOutcome::Skipped {
            self.touched
                .lock()
                .expect("touched list poisoned")
                .push(key.clone());
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.fire();
        }
    }

    fn fire(&self) {
        let completion = self
            .completion
            .lock()
            .expect("completion slot poisoned")
            .take();
        if let Some(callback) = completion {
            let touched =
                std::mem::take(&mut *self.touched.lock().expect("touched list poisoned"));
            debug!(
                activity_id = %self.activity_id,
                description = %self.description,
                touched = touched.len(),
                "multiple entity work complete"
            );
            callback(touched);
        }
    }
}

/// Builds works, wires their constituents to the shared completion counter
/// and hands the items to the job queue.
pub struct MultipleEntityWorkManager<T> {
    queue: Arc<JobQueueManager<T>>,
}

impl<T> MultipleEntityWorkManager<T>
where
    T: Serialize + Send + Sync + 'static,
{
    pub fn new(queue: Arc<JobQueueManager<T>>) -> Self {
        Self { queue }
    }

    pub fn submit(
        &self,
        description: impl Into<String>,
        items: Vec<JobItem<T>>,
        completion: WorkCompletion,
    ) -> Arc<MultipleEntityWork> {
        let work = Arc::new(MultipleEntityWork::new(
            description.into(),
            ActivityId::new(),
            items.len(),
            completion,
        ));

        if items.is_empty() {
            work.fire();
            return work;
        }

        for mut item in items {
            item.attach_work(Arc::clone(&work));
            self.queue.schedule(item);
        }
        work
    }
}
