//! Bounded exponential backoff for transient node and oracle failures

use std::future::Future;
use std::time::Duration;

use crate::error::Retryable;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    pub fn new(max_retries: u32, initial_ms: u64) -> Self {
        Self {
            max_retries,
            initial: Duration::from_millis(initial_ms),
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-transient error or
    /// exhausts the retry budget.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    tracing::debug!("{} failed ({}), retry {} in {:?}", what, e, attempt, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
