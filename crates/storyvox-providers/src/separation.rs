//! Vocal/background stem separation.
//!
//! The cloud service is asynchronous (create a task, then poll); the local
//! service answers the single request once the stems are ready.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SeparationConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_client, endpoint, ensure_success, with_bearer};
use crate::poll::poll_until;

const PROVIDER: &str = "separation";

/// URLs of the two separated stems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparatedStems {
    pub vocals_url: String,
    pub background_url: String,
}

#[async_trait]
pub trait VocalSeparator: Send + Sync {
    async fn separate(&self, audio_url: &str) -> ProviderResult<SeparatedStems>;
}

#[derive(Debug, Serialize)]
struct SeparationRequest<'a> {
    audio_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    status: String,
    #[serde(default)]
    vocals_url: Option<String>,
    #[serde(default)]
    background_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl TaskResponse {
    fn into_stems(self) -> ProviderResult<Option<SeparatedStems>> {
        match self.status.as_str() {
            "succeeded" | "completed" => match (self.vocals_url, self.background_url) {
                (Some(vocals_url), Some(background_url)) => Ok(Some(SeparatedStems {
                    vocals_url,
                    background_url,
                })),
                _ => Err(ProviderError::invalid_response(
                    "separation finished without both stems",
                )),
            },
            "failed" | "error" => Err(ProviderError::task_failed(
                self.error.unwrap_or_else(|| "separation failed".to_string()),
            )),
            _ => Ok(None),
        }
    }
}

/// Hosted separation API with task polling.
pub struct CloudSeparator {
    http: Client,
    config: SeparationConfig,
}

impl CloudSeparator {
    pub fn new(config: SeparationConfig) -> ProviderResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
        })
    }

    async fn create_task(&self, audio_url: &str) -> ProviderResult<String> {
        let response = with_bearer(
            self.http.post(endpoint(&self.config.cloud_url, "separations")),
            self.config.api_key.as_deref(),
        )
        .json(&SeparationRequest { audio_url })
        .send()
        .await?;
        let created: CreateTaskResponse = ensure_success(PROVIDER, response).await?.json().await?;
        Ok(created.id)
    }

    async fn check_task(&self, task_id: &str) -> ProviderResult<Option<SeparatedStems>> {
        let url = endpoint(&self.config.cloud_url, &format!("separations/{}", task_id));
        let response = with_bearer(self.http.get(url), self.config.api_key.as_deref())
            .send()
            .await?;
        let task: TaskResponse = ensure_success(PROVIDER, response).await?.json().await?;
        debug!(task_id, status = %task.status, "Separation task status");
        task.into_stems()
    }
}

#[async_trait]
impl VocalSeparator for CloudSeparator {
    async fn separate(&self, audio_url: &str) -> ProviderResult<SeparatedStems> {
        let task_id = self.create_task(audio_url).await?;
        info!(task_id = %task_id, "Separation task created");
        let task_id = task_id.as_str();
        poll_until(&self.config.poll, "separation", move || self.check_task(task_id)).await
    }
}

/// Self-hosted separation service (`POST /separate`).
pub struct LocalSeparator {
    http: Client,
    config: SeparationConfig,
}

impl LocalSeparator {
    pub fn new(config: SeparationConfig) -> ProviderResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
        })
    }
}

#[async_trait]
impl VocalSeparator for LocalSeparator {
    async fn separate(&self, audio_url: &str) -> ProviderResult<SeparatedStems> {
        let response = with_bearer(
            self.http.post(endpoint(&self.config.local_url, "separate")),
            self.config.api_key.as_deref(),
        )
        .json(&SeparationRequest { audio_url })
        .send()
        .await?;
        let stems: SeparatedStems = ensure_success(PROVIDER, response).await?.json().await?;
        info!("Local separation finished");
        Ok(stems)
    }
}
