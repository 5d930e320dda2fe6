//! Generation job handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use storyvox_engine::{ActiveJob, CreateJobRequest};
use storyvox_models::{Job, JobId, JobPage, TranscriptSegment};

use crate::auth::Owner;
use crate::error::ApiResult;
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub job_id: JobId,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    /// Indices to keep; every other segment is deselected
    pub selected: Vec<u32>,
}

#[derive(Debug, Serialize)]
pub struct SubtitlesResponse {
    pub job_id: JobId,
    pub segments: Vec<TranscriptSegment>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_job(
    State(state): State<AppState>,
    owner: Owner,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    let job_id = state.service.create_job(owner.as_str(), request).await?;
    Ok((StatusCode::CREATED, Json(JobCreatedResponse { job_id })))
}

pub async fn get_job(
    State(state): State<AppState>,
    owner: Owner,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state
        .service
        .get_job(owner.as_str(), &JobId::from_string(job_id))
        .await?;
    Ok(Json(job))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    owner: Owner,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<JobPage>> {
    let page = state
        .service
        .list_jobs(owner.as_str(), query.page, query.page_size)
        .await?;
    Ok(Json(page))
}

pub async fn regenerate_job(
    State(state): State<AppState>,
    owner: Owner,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    let job_id = state
        .service
        .regenerate_job(owner.as_str(), &JobId::from_string(job_id))
        .await?;
    Ok((StatusCode::CREATED, Json(JobCreatedResponse { job_id })))
}

/// Jobs running in this process, oldest first.
pub async fn list_active_jobs(
    State(state): State<AppState>,
    owner: Owner,
) -> Json<Vec<ActiveJob>> {
    let jobs = state
        .service
        .list_active_jobs()
        .await
        .into_iter()
        .filter(|j| j.owner == owner.as_str())
        .collect();
    Json(jobs)
}

pub async fn get_subtitles(
    State(state): State<AppState>,
    owner: Owner,
    Path(job_id): Path<String>,
) -> ApiResult<Json<SubtitlesResponse>> {
    let job_id = JobId::from_string(job_id);
    let segments = state.service.get_subtitles(owner.as_str(), &job_id).await?;
    Ok(Json(SubtitlesResponse { job_id, segments }))
}

pub async fn update_subtitle_selection(
    State(state): State<AppState>,
    owner: Owner,
    Path(job_id): Path<String>,
    Json(request): Json<SelectionRequest>,
) -> ApiResult<StatusCode> {
    state
        .service
        .update_subtitle_selection(owner.as_str(), &JobId::from_string(job_id), &request.selected)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
