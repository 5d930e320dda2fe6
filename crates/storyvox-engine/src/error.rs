//! Engine error types.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    #[error("Chunk {0} has no usable speech")]
    NoUsableAudio(u32),

    #[error("No chunk could be composited")]
    NoSuccessfulChunks,

    #[error("Job {0} was finalized elsewhere")]
    JobFinalized(String),

    #[error("Media error: {0}")]
    Media(#[from] storyvox_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] storyvox_storage::StorageError),

    #[error("Store error: {0}")]
    Store(#[from] storyvox_store::StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] storyvox_providers::ProviderError),

    #[error("Queue error: {0}")]
    Queue(#[from] storyvox_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn missing_artifact(name: impl Into<String>) -> Self {
        Self::MissingArtifact(name.into())
    }
}
