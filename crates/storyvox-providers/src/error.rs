//! Provider client error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("{provider} returned {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Rate limited by {provider} (429): {body}")]
    RateLimited { provider: &'static str, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Call limiter closed")]
    LimiterClosed,

    #[error("Task still running after {0} polls")]
    PollExhausted(u32),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskFailed(msg.into())
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(provider: &'static str, status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == 429 {
            Self::RateLimited { provider, body }
        } else {
            Self::Http {
                provider,
                status,
                body,
            }
        }
    }

    /// Timeouts (including 408), 5xx responses and rate limits.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::Http { status, .. } => *status >= 500 || *status == 408,
            ProviderError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::Http { body, .. } => body.contains("RESOURCE_EXHAUSTED"),
            _ => false,
        }
    }
}
