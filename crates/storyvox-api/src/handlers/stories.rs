//! Story handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use storyvox_engine::CreateStoryRequest;
use storyvox_models::{Story, StoryId};

use crate::auth::Owner;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_story(
    State(state): State<AppState>,
    owner: Owner,
    Json(request): Json<CreateStoryRequest>,
) -> ApiResult<(StatusCode, Json<Story>)> {
    let story = state.service.create_story(owner.as_str(), request).await?;
    Ok((StatusCode::CREATED, Json(story)))
}

pub async fn get_story(
    State(state): State<AppState>,
    owner: Owner,
    Path(story_id): Path<String>,
) -> ApiResult<Json<Story>> {
    let story = state
        .service
        .get_story(owner.as_str(), &StoryId::from_string(story_id))
        .await?;
    Ok(Json(story))
}
