//! Story analysis queue for StoryVox.
//!
//! This crate provides:
//! - A single-worker in-process FIFO with explicit start/stop
//! - Rate-limit detection by configurable error signatures
//! - Delayed re-queueing with linear backoff and a retry cap
//! - The [`AnalysisPipeline`] seam the worker drives

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod rate_limit;

pub use config::{AnalysisQueueConfig, DEFAULT_RATE_LIMIT_SIGNATURES};
pub use error::{PipelineError, QueueError, QueueResult};
pub use pipeline::AnalysisPipeline;
pub use queue::AnalysisQueue;
pub use rate_limit::RateLimitMatcher;
