use std::time::{Duration, Instant};

/// Stateless-at-the-seam strategy answering "has enough time passed to retry".
///
/// `should_retry` must not mutate bookkeeping; only `on_retry` records that an
/// attempt was issued.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, now: Instant) -> bool;
    fn on_retry(&mut self, now: Instant);
}

/// Canonical policy: the first retry is always allowed, later ones require
/// the configured interval to have elapsed since the last attempt.
#[derive(Debug, Clone)]
pub struct LinearRetryPolicy {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl LinearRetryPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl RetryPolicy for LinearRetryPolicy {
    fn should_retry(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    fn on_retry(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }
}
