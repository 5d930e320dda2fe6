//! Shared bound on concurrent external calls.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Counting limiter shared by every chunk of every job.
///
/// Callers wait for a permit; the limiter never rejects.
#[derive(Debug, Clone)]
pub struct CallLimiter {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

impl CallLimiter {
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit.
    pub async fn acquire(&self) -> ProviderResult<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProviderError::LimiterClosed)
    }

    /// Run `call` while holding a permit.
    pub async fn run<T, Fut>(&self, operation: &str, call: Fut) -> ProviderResult<T>
    where
        Fut: Future<Output = ProviderResult<T>>,
    {
        let _permit = self.acquire().await?;
        debug!(operation, available = self.available(), "Acquired call permit");
        call.await
    }
}

impl Default for CallLimiter {
    fn default() -> Self {
        Self::new(5)
    }
}
