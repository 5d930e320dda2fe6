//! Queue error types.

use storyvox_models::StoryId;
use storyvox_store::StoreError;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Story {0} is already queued for analysis")]
    AlreadyQueued(StoryId),

    #[error("Story not found: {0}")]
    StoryNotFound(StoryId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Error returned by an analysis pipeline run.
pub type PipelineError = Box<dyn std::error::Error + Send + Sync>;
