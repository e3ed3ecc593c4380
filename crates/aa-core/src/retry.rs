//! Bounded exponential backoff for storage writes.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Retry schedule: `max_attempts` tries, waiting `base_delay * multiplier^(n-1)`
/// after the n-th failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// Returns `Ok(None)` when `cancel` fires between attempts. The first
    /// attempt always runs. Exhaustion yields [`crate::Error::Persistence`].
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> crate::Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(err) => err,
            };

            if attempt >= attempts {
                error!(%err, operation, attempts, "giving up after repeated storage failures");
                return Err(crate::Error::Persistence {
                    operation: operation.to_string(),
                    attempts,
                    message: err.to_string(),
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                %err,
                operation,
                attempt,
                attempts,
                delay_ms = delay.as_millis() as u64,
                "storage write failed, retrying"
            );

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }
}
