use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Backoff policy for transfers. Delays double per retry up to
/// `max_delay_secs`, plus up to `base_delay_secs` of jitter so parallel
/// transfers failing together do not retry in lockstep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_secs: 5,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let backoff = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs);
        let jitter = match self.base_delay_secs {
            0 => 0,
            base => rand::thread_rng().gen_range(0..base),
        };
        Duration::from_secs(backoff + jitter)
    }
}

/// Run `operation` until it succeeds, `classifier` says abort, or the
/// attempts run out. The error of the final attempt is returned.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let attempts = config.attempts();
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };
        attempt += 1;
        if attempt >= attempts || classifier(&err) == RetryAction::Abort {
            return Err(err);
        }
        let delay = config.delay_for_retry(attempt - 1);
        tracing::warn!(
            "Attempt {}/{} failed, retrying in {}s: {}",
            attempt,
            attempts,
            delay.as_secs(),
            err
        );
        tokio::time::sleep(delay).await;
    }
}
