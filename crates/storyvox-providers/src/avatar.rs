//! Lip-synced avatar video synthesis (create a task, then poll it).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use storyvox_models::{AvatarRef, BoundingBox};

use crate::config::AvatarConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_client, endpoint, ensure_success, with_bearer};
use crate::limiter::CallLimiter;
use crate::poll::{poll_until, PollConfig};

const PROVIDER: &str = "avatar";

/// One avatar synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvatarRequest {
    pub avatar_id: String,
    pub image_url: String,
    pub audio_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_bbox: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_bbox: Option<BoundingBox>,
}

impl AvatarRequest {
    pub fn new(avatar: &AvatarRef, audio_url: impl Into<String>) -> Self {
        Self {
            avatar_id: avatar.avatar_id.clone(),
            image_url: avatar.image_url.clone(),
            audio_url: audio_url.into(),
            face_bbox: avatar.face_bbox,
            ext_bbox: avatar.ext_bbox,
        }
    }
}

/// State of an avatar task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarTaskStatus {
    Running,
    Succeeded { video_url: String },
    Failed { error: String },
}

#[async_trait]
pub trait AvatarGenerator: Send + Sync {
    /// Submit a task; returns the provider's task id.
    async fn create_task(&self, request: &AvatarRequest) -> ProviderResult<String>;

    async fn poll_task(&self, task_id: &str) -> ProviderResult<AvatarTaskStatus>;

    /// Longest audio the provider accepts.
    fn max_audio_duration(&self) -> Duration;

    /// Poll configuration for this provider.
    fn poll_config(&self) -> PollConfig;

    /// Create a task and poll it to a terminal state.
    ///
    /// `limiter` is held per request, not across the wait between polls.
    async fn generate(&self, request: &AvatarRequest, limiter: &CallLimiter) -> ProviderResult<String> {
        let task_id = limiter.run("avatar_create", self.create_task(request)).await?;
        info!(task_id = %task_id, avatar_id = %request.avatar_id, "Avatar task created");
        let poll = self.poll_config();
        let task_id = task_id.as_str();
        poll_until(&poll, "avatar", move || async move {
            match limiter.run("avatar_poll", self.poll_task(task_id)).await? {
                AvatarTaskStatus::Running => Ok(None),
                AvatarTaskStatus::Succeeded { video_url } => Ok(Some(video_url)),
                AvatarTaskStatus::Failed { error } => Err(ProviderError::task_failed(error)),
            }
        })
        .await
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    status: String,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP avatar service. Cloud and local deployments share the API and
/// differ only in base URL.
pub struct HttpAvatarGenerator {
    http: Client,
    base_url: String,
    config: AvatarConfig,
}

impl HttpAvatarGenerator {
    pub fn new(config: AvatarConfig, base_url: impl Into<String>) -> ProviderResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            base_url: base_url.into(),
            config,
        })
    }
}

#[async_trait]
impl AvatarGenerator for HttpAvatarGenerator {
    async fn create_task(&self, request: &AvatarRequest) -> ProviderResult<String> {
        let response = with_bearer(
            self.http.post(endpoint(&self.base_url, "tasks")),
            self.config.api_key.as_deref(),
        )
        .json(request)
        .send()
        .await?;
        let created: CreateTaskResponse = ensure_success(PROVIDER, response).await?.json().await?;
        Ok(created.task_id)
    }

    async fn poll_task(&self, task_id: &str) -> ProviderResult<AvatarTaskStatus> {
        let url = endpoint(&self.base_url, &format!("tasks/{}", task_id));
        let response = with_bearer(self.http.get(url), self.config.api_key.as_deref())
            .send()
            .await?;
        let task: TaskResponse = ensure_success(PROVIDER, response).await?.json().await?;
        debug!(task_id, status = %task.status, "Avatar task status");

        match task.status.as_str() {
            "succeeded" | "completed" => task
                .video_url
                .map(|video_url| AvatarTaskStatus::Succeeded { video_url })
                .ok_or_else(|| ProviderError::invalid_response("avatar task succeeded without video_url")),
            "failed" | "error" => Ok(AvatarTaskStatus::Failed {
                error: task.error.unwrap_or_else(|| "avatar generation failed".to_string()),
            }),
            _ => Ok(AvatarTaskStatus::Running),
        }
    }

    fn max_audio_duration(&self) -> Duration {
        self.config.max_audio_duration
    }

    fn poll_config(&self) -> PollConfig {
        self.config.poll
    }
}
