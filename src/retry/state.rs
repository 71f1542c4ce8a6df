// ============================================================================
// Sequence-Numbered Retry State
// ============================================================================

use super::policy::{LinearRetryPolicy, RetryPolicy};
use std::time::Instant;
use tracing::debug;

/// Per-feature retry lifecycle built on a RetryPolicy.
///
/// Sequence numbers are the cancellation mechanism: `start` bumps the
/// sequence, so any retry attempt issued before it becomes stale and its
/// completion is rejected by `on_retry` without touching policy bookkeeping.
#[derive(Debug, Clone)]
pub struct RetryState<P = LinearRetryPolicy> {
    pending: bool,
    sequence: i64,
    policy: P,
}

impl<P: RetryPolicy> RetryState<P> {
    pub fn new(policy: P) -> Self {
        Self {
            pending: false,
            sequence: 0,
            policy,
        }
    }

    /// Mark the feature as wanting retries. Re-entrant; always bumps the
    /// sequence so earlier in-flight retries go stale.
    pub fn start(&mut self) {
        self.pending = true;
        self.sequence += 1;
    }

    /// Clear pending. Subsequent `should_retry` calls return nothing until
    /// the next `start`.
    pub fn finish(&mut self) {
        self.pending = false;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Returns the current sequence number if a retry is due now, leaving all
    /// state untouched otherwise.
    pub fn should_retry(&self, now: Instant) -> Option<i64> {
        if self.pending && self.policy.should_retry(now) {
            Some(self.sequence)
        } else {
            None
        }
    }

    /// Apply a retry attempt carrying `sequence`. Records policy bookkeeping
    /// and returns true only for the latest sequence of a still-pending
    /// feature; a stale completion is a silent no-op.
    ///
    /// # Panics
    /// A sequence greater than the current one was never issued by this state
    /// and indicates a caller bug.
    pub fn on_retry(&mut self, sequence: i64, now: Instant) -> bool {
        assert!(
            sequence <= self.sequence,
            "retry sequence {sequence} is ahead of current {}",
            self.sequence
        );
        if self.pending && sequence == self.sequence {
            self.policy.on_retry(now);
            true
        } else {
            debug!(
                sequence,
                current = self.sequence,
                pending = self.pending,
                "ignoring stale retry completion"
            );
            false
        }
    }
}
