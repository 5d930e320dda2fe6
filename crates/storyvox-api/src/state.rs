//! Application state.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use storyvox_engine::{EngineConfig, JobOrchestrator, StoryAnalysisPipeline, StoryService};
use storyvox_media::{EncodingSettings, FfmpegToolchain, MediaToolchain};
use storyvox_providers::{CallLimiter, ProviderSet};
use storyvox_queue::{AnalysisQueue, AnalysisQueueConfig};
use storyvox_storage::{ArtifactStore, LocalArtifactStore, R2ArtifactStore, R2Client};
use storyvox_store::{FirestoreClient, StoreSet};

use crate::config::{ApiConfig, ArtifactBackend, StoreBackend};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub stores: StoreSet,
    pub service: StoryService,
    pub queue: AnalysisQueue,
    pub orchestrator: Arc<JobOrchestrator>,
}

impl AppState {
    /// Build every long-lived component once.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let stores = match config.store_backend {
            StoreBackend::Memory => StoreSet::memory(),
            StoreBackend::Firestore => StoreSet::firestore(
                FirestoreClient::from_env()
                    .await
                    .context("failed to create Firestore client")?,
            ),
        };

        let artifacts: Arc<dyn ArtifactStore> = match config.artifact_backend {
            ArtifactBackend::Local => Arc::new(LocalArtifactStore::new(&config.artifact_root)),
            ArtifactBackend::R2 => {
                let client = R2Client::from_env().await.context("failed to create R2 client")?;
                client
                    .check_connectivity()
                    .await
                    .context("R2 bucket unreachable")?;
                Arc::new(R2ArtifactStore::new(client)?)
            }
        };

        FfmpegToolchain::verify_installation().context("FFmpeg toolchain unavailable")?;
        let toolchain: Arc<dyn MediaToolchain> =
            Arc::new(FfmpegToolchain::new(EncodingSettings::default()));
        let providers = ProviderSet::from_env().context("failed to create provider clients")?;

        info!(
            store = ?config.store_backend,
            artifacts = ?config.artifact_backend,
            "Backends selected"
        );
        Ok(Self::from_parts(
            config,
            stores,
            providers,
            toolchain,
            artifacts,
            EngineConfig::from_env(),
            AnalysisQueueConfig::from_env(),
        ))
    }

    /// Wire the engine, queue and service from already built parts.
    pub fn from_parts(
        config: ApiConfig,
        stores: StoreSet,
        providers: ProviderSet,
        toolchain: Arc<dyn MediaToolchain>,
        artifacts: Arc<dyn ArtifactStore>,
        engine_config: EngineConfig,
        queue_config: AnalysisQueueConfig,
    ) -> Self {
        let limiter = CallLimiter::new(engine_config.max_external_calls);

        let pipeline = Arc::new(StoryAnalysisPipeline::new(
            toolchain.clone(),
            artifacts.clone(),
            providers.transcriber.clone(),
            providers.classifier.clone(),
            limiter.clone(),
            &engine_config,
            queue_config.single_speaker_threshold,
        ));
        let queue = AnalysisQueue::new(queue_config, stores.stories.clone(), pipeline);

        let orchestrator = Arc::new(JobOrchestrator::new(
            stores.clone(),
            providers,
            toolchain,
            artifacts,
            limiter,
            engine_config,
        ));
        let service = StoryService::new(stores.clone(), orchestrator.clone(), queue.clone());

        Self {
            config,
            stores,
            service,
            queue,
            orchestrator,
        }
    }
}
