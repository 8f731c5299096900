use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::error::Result;

/// Bounded retry budget for transient failures: exponential backoff from
/// `base_delay`, with jitter so concurrent callers spread out.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp + exp.mul_f64(rand::thread_rng().gen_range(0.0..0.5))
    }
}

/// Runs `call` until it succeeds, fails with a non-transient error, or the
/// attempt budget runs out. Structural errors are never retried.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %err,
                    "transient failure, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
