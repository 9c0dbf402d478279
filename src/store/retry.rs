use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::PresenceError;

/// Bounded retry with backoff and jitter, applied to idempotent store reads.
/// Non-retryable errors (pool exhaustion, resolution failures) pass through
/// on the first attempt.
pub struct RetryOperation {
    pub retries: u8,
    pub delay_ms: u64,
    pub backoff: f64,
    pub jitter_ms: u64,
}

pub const RETRY_OPT: RetryOperation = RetryOperation {
    retries: 3,
    delay_ms: 100,
    backoff: 2.0,
    jitter_ms: 50,
};

impl RetryOperation {
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, PresenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PresenceError>>,
    {
        let mut attempts = self.retries.max(1);

        loop {
            match operation().await {
                Ok(val) => return Ok(val),
                Err(e) => {
                    attempts -= 1;
                    if attempts == 0 || !e.is_retryable() {
                        return Err(e);
                    }
                    let jitter = rand::thread_rng().gen_range(0..self.jitter_ms.max(1));
                    let delay = (self.delay_ms as f64 * self.backoff).round() as u64 + jitter;
                    sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }
}
