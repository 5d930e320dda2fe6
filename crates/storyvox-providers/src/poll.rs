//! Fixed-interval polling for create-then-poll provider APIs.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};

/// Poll interval and attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    /// 5 s × 180 = 15 minutes.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 180,
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Call `check` until it yields a value, sleeping `interval` between calls.
///
/// `Ok(None)` means "still running". A retryable error (5xx, 429, network)
/// uses up the attempt and polling carries on; any other error ends it.
/// After `max_attempts` checks without a result the poll fails with
/// [`ProviderError::PollExhausted`].
pub async fn poll_until<T, F, Fut>(config: &PollConfig, operation: &str, mut check: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<Option<T>>>,
{
    for attempt in 1..=config.max_attempts {
        match check().await {
            Ok(Some(value)) => {
                debug!(operation, attempt, "Poll finished");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                warn!(operation, attempt, error = %e, "Poll check failed, will poll again");
            }
            Err(e) => return Err(e),
        }
        if attempt < config.max_attempts {
            tokio::time::sleep(config.interval).await;
        }
    }
    Err(ProviderError::PollExhausted(config.max_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_when_ready() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let config = PollConfig::new(Duration::from_secs(5), 10);

        let counter = &calls;
        let value = poll_until(&config, "test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((n == 3).then_some("done"))
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = PollConfig::new(Duration::from_secs(5), 4);

        let counter = &calls;
        let result: ProviderResult<()> = poll_until(&config, "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .await;

        assert!(matches!(result, Err(ProviderError::PollExhausted(4))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_rides_out_transient_errors() {
        let calls = AtomicU32::new(0);
        let config = PollConfig::new(Duration::from_secs(5), 10);

        let counter = &calls;
        let value = poll_until(&config, "test", move || async move {
            match counter.fetch_add(1, Ordering::SeqCst) + 1 {
                1 => Ok(None),
                2 => Err(ProviderError::from_status("avatar", 503, "unavailable".to_string())),
                _ => Ok(Some("done")),
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_counts_transient_errors_as_attempts() {
        let calls = AtomicU32::new(0);
        let config = PollConfig::new(Duration::from_secs(5), 3);

        let counter = &calls;
        let result: ProviderResult<()> = poll_until(&config, "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::from_status("avatar", 502, String::new()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::PollExhausted(3))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_on_error() {
        let config = PollConfig::default();
        let result: ProviderResult<()> =
            poll_until(&config, "test", || async { Err(ProviderError::task_failed("boom")) }).await;
        assert!(matches!(result, Err(ProviderError::TaskFailed(_))));
    }
}
