// Retry policies for gateway calls
//
// Every call site picks a policy by how tolerant the operation is of
// transient failure. The gateway owns all retrying; reconcilers never
// retry a failed write themselves.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Error;

/// How many times, and how often, a gateway call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero means a single attempt.
    pub max_retries: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// A single attempt.
    pub const NONE: Self = Self {
        max_retries: 0,
        interval: Duration::ZERO,
    };

    /// For calls expected to succeed almost immediately (~1s budget).
    pub const SHORT: Self = Self {
        max_retries: 3,
        interval: Duration::from_millis(300),
    };

    /// For calls that may race device-side reconfiguration (~1 min budget).
    pub const MEDIUM: Self = Self {
        max_retries: 30,
        interval: Duration::from_secs(2),
    };

    /// For long-running device state transitions such as licensing or
    /// waiting for the device to come back after a restart (~15 min budget).
    pub const LONG: Self = Self {
        max_retries: 90,
        interval: Duration::from_secs(10),
    };

    pub const fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
        }
    }

    /// Total attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `op` until it succeeds, retrying transient failures.
    ///
    /// Non-transient errors are returned immediately.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts() => {
                    debug!(operation, attempt, error = %e, "transient failure, retrying");
                    tokio::time::sleep(self.interval).await;
                }
                Err(e) => {
                    if attempt > 1 {
                        warn!(operation, attempt, error = %e, "giving up");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Poll `check` until it reports `true`.
    ///
    /// Errors from `check` count as a failed poll. Exhausting the policy
    /// yields [`Error::Timeout`].
    pub async fn poll<F, Fut>(&self, operation: &str, mut check: F) -> Result<(), Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, Error>>,
    {
        for attempt in 1..=self.attempts() {
            match check().await {
                Ok(true) => return Ok(()),
                Ok(false) => debug!(operation, attempt, "not ready yet"),
                Err(e) => debug!(operation, attempt, error = %e, "poll failed"),
            }
            if attempt < self.attempts() {
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(Error::Timeout {
            operation: operation.to_owned(),
            attempts: self.attempts(),
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::SHORT
    }
}
