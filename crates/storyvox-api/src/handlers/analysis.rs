//! Story analysis queue handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use storyvox_engine::EnqueueAnalysisRequest;
use storyvox_models::{QueueStatus, StoryId};

use crate::auth::Owner;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct EnqueueAnalysisResponse {
    pub story_id: StoryId,
    pub queue_depth: usize,
}

/// Queue a story for speaker analysis. The body is optional.
pub async fn enqueue_analysis(
    State(state): State<AppState>,
    owner: Owner,
    Path(story_id): Path<String>,
    request: Option<Json<EnqueueAnalysisRequest>>,
) -> ApiResult<(StatusCode, Json<EnqueueAnalysisResponse>)> {
    let story_id = StoryId::from_string(story_id);
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let queue_depth = state
        .service
        .enqueue_analysis(owner.as_str(), &story_id, request)
        .await?;
    info!(story_id = %story_id, queue_depth, "Analysis requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueAnalysisResponse {
            story_id,
            queue_depth,
        }),
    ))
}

pub async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.service.queue_status().await)
}
