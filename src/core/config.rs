use std::time::Duration;

/// Configuration of the concurrency/persistence core
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Timeout applied to every persistent store operation
    pub commit_timeout: Duration,

    /// Interval the linear retry policy enforces between FM resend attempts
    pub fm_retry_interval: Duration,

    /// Escalate unexpected commit failures (GenericFailure) to the fatal
    /// handler instead of only rolling back. Job items may override this
    /// per item.
    pub fail_fast_on_commit_failure: bool,
}

impl FailoverConfig {
    pub fn new() -> Self {
        Self {
            commit_timeout: Duration::from_secs(30),
            fm_retry_interval: Duration::from_secs(5),
            fail_fast_on_commit_failure: false,
        }
    }

    /// Set the store operation timeout
    pub fn commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Set the FM retry interval
    pub fn fm_retry_interval(mut self, interval: Duration) -> Self {
        self.fm_retry_interval = interval;
        self
    }

    /// Set the default commit-failure escalation policy
    pub fn fail_fast_on_commit_failure(mut self, fail_fast: bool) -> Self {
        self.fail_fast_on_commit_failure = fail_fast;
        self
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self::new()
    }
}
