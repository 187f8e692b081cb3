use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// How a dispatched call reacts when the selected node fails underneath it.
pub struct RetryOptions {
    pub(crate) limit: usize,
    pub(crate) delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            limit: 1,
            delay: Duration::ZERO,
        }
    }
}

impl RetryOptions {
    /// Sets how many times a call is replayed on a newly selected node before giving up.
    pub fn retry_limit(self, limit: usize) -> Self {
        Self { limit, ..self }
    }

    /// Sets how long we wait before replaying a call.
    pub fn retry_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
