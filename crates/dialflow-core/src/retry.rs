use crate::collab::{CollabError, CollabResult};
use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff with jitter around any collaborator call.
///
/// Classification rides on `CollabError`: transient failures burn attempts
/// and back off; fatal failures surface immediately without touching the
/// remaining budget. A server-supplied retry-after hint replaces the computed
/// delay, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self::new(cfg.max_attempts, cfg.base_delay(), cfg.max_delay())
    }

    pub async fn execute<T, F, Fut>(&self, op: &str, mut call: F) -> CollabResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CollabResult<T>>,
    {
        let mut failures = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err @ CollabError::Fatal { .. }) => {
                    warn!(op = %op, error = %err, "fatal collaborator error");
                    return Err(err);
                }
                Err(err) => {
                    failures += 1;
                    if failures >= self.max_attempts {
                        warn!(op = %op, attempts = failures, error = %err, "retry budget exhausted");
                        return Err(err);
                    }
                    let delay = match err.retry_after() {
                        Some(hint) => hint.min(self.max_delay),
                        None => self.jittered_delay(failures),
                    };
                    warn!(
                        op = %op,
                        attempt = failures,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient collaborator error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// base * 2^(failures-1), capped at max_delay.
    fn scaled_delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    // Equal jitter: half deterministic, half random. Keeps the result under
    // the cap while spreading simultaneous retries apart.
    fn jittered_delay(&self, failures: u32) -> Duration {
        let scaled = self.scaled_delay(failures);
        scaled.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
