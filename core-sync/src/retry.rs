//! Bounded retry policy for remote requests.
//!
//! Throttling waits the remote's suggested duration plus a safety margin.
//! Transient failures and timeouts back off exponentially from `base_wait`,
//! capped at `max_wait`, with random jitter. Every other error is returned
//! immediately. Waits only suspend the calling request and end early on
//! cancellation.

use crate::error::FetchError;
use bridge_traits::RemoteError;
use core_runtime::config::RetrySettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_wait: Duration,
    pub max_wait: Duration,
    pub jitter: Duration,
    pub throttle_margin: Duration,
    /// Per-attempt deadline; expiry counts as [`RemoteError::Timeout`].
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default(), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings, request_timeout: Duration) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_wait: settings.base_wait(),
            max_wait: settings.max_wait(),
            jitter: settings.jitter(),
            throttle_margin: settings.throttle_margin(),
            request_timeout,
        }
    }

    /// Backoff before attempt `attempt + 1` after a transient failure, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_wait
            .saturating_mul(1u32 << exponent)
            .min(self.max_wait)
    }

    fn jitter_sample(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    /// Wait before retrying after `err` on attempt `attempt`.
    pub fn wait_for(&self, err: &RemoteError, attempt: u32) -> Duration {
        match err {
            RemoteError::RateLimited { retry_after } => {
                *retry_after + self.throttle_margin + self.jitter_sample()
            }
            _ => self.backoff(attempt) + self.jitter_sample(),
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt budget
    /// is spent. `on_throttle(wait, attempt)` is called before every
    /// rate-limit wait.
    pub async fn run<T, F, Fut, O>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        on_throttle: O,
        mut op: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
        O: Fn(Duration, u32),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let err = match tokio::time::timeout(self.request_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => RemoteError::Timeout,
            };

            if !err.is_retryable() {
                debug!(request = label, error = %err, "Request failed permanently");
                return Err(FetchError::Remote(err));
            }

            if attempt >= self.max_attempts {
                warn!(request = label, attempts = attempt, error = %err, "Retry budget exhausted");
                return Err(FetchError::RetriesExhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let wait = self.wait_for(&err, attempt);
            if matches!(err, RemoteError::RateLimited { .. }) {
                warn!(
                    request = label,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "Throttled by remote source"
                );
                on_throttle(wait, attempt);
            } else {
                debug!(
                    request = label,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "Retrying after transient failure"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
