//! API routes.

use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::analysis::{enqueue_analysis, queue_status};
use crate::handlers::jobs::{
    create_job, get_job, get_subtitles, list_active_jobs, list_jobs, regenerate_job,
    update_subtitle_selection,
};
use crate::handlers::stories::{create_story, get_story};
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, rate_limit_middleware, request_id, ClientRateLimiter};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let story_routes = Router::new()
        .route("/stories", post(create_story))
        .route("/stories/:story_id", get(get_story))
        .route("/stories/:story_id/analysis", post(enqueue_analysis))
        .route("/analysis/queue", get(queue_status));

    let job_routes = Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/active", get(list_active_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/regenerate", post(regenerate_job))
        .route("/jobs/:job_id/subtitles", get(get_subtitles))
        .route("/jobs/:job_id/subtitles/selection", put(update_subtitle_selection));

    let rate_limiter =
        ClientRateLimiter::new(state.config.rate_limit_rps, state.config.rate_limit_burst);
    rate_limiter.spawn_cleanup(Duration::from_secs(60));
    let api_routes = Router::new()
        .merge(story_routes)
        .merge(job_routes)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api/v1", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
