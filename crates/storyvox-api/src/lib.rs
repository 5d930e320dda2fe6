//! Axum HTTP API server for StoryVox.
//!
//! This crate provides:
//! - JSON endpoints for stories, jobs, subtitles and the analysis queue
//! - Caller identity from the gateway's `X-User-Id` header
//! - Per-IP rate limiting, CORS and request ids
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{ApiConfig, ArtifactBackend, StoreBackend};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
