//! Bounded retries around single external calls.

use std::future::Future;
use std::time::Duration;

use storyvox_providers::ProviderResult;
use tracing::warn;

use crate::metrics;

/// Fixed retry count with doubling backoff.
#[derive(Debug, Clone, Copy)]
pub struct CallRetry {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl CallRetry {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Run `call`, retrying up to `max_retries` more times on
    /// [retryable](storyvox_providers::ProviderError::is_retryable) failures.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && e.is_retryable() => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    metrics::record_call_retry(operation);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "External call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
