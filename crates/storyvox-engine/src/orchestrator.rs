//! Job orchestrator: sequences the pipeline stages for one job.
//!
//! ```text
//! init -> extracting-audio -> separating-vocals -> transcribing
//!      -> generating-voice -> generating-avatar -> compositing-video -> completed
//! ```
//!
//! Regenerated jobs jump from init straight to generating-voice, reusing
//! the earlier job's extracted audio, stems and subtitles.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn, Instrument};

use storyvox_media::{MediaToolchain, ProcessLimitedToolchain};
use storyvox_models::{artifact_keys, Job, JobId, JobProgress, JobStep, StatusUpdate};
use storyvox_providers::{CallLimiter, ProviderSet};
use storyvox_storage::{keys, ArtifactStore};
use storyvox_store::{JobStore, StoreError, StoreSet};

use crate::compositor::{ChunkSegment, Compositor};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::generator::{ChunkAudio, ChunkAvatars, ChunkGenerator, SpeakerAvatar};
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::ActiveJobRegistry;
use crate::retry::CallRetry;
use crate::segmentation::{attribute_speakers, build_segments, plan_chunks};

/// Map a write refused on a terminal job to [`EngineError::JobFinalized`].
fn finalized(error: StoreError, job_id: &JobId) -> EngineError {
    match error {
        StoreError::InvalidTransition(_) => EngineError::JobFinalized(job_id.to_string()),
        other => other.into(),
    }
}

/// Forward-only step/progress writer for one run.
struct StepTracker<'a> {
    jobs: &'a dyn JobStore,
    registry: &'a ActiveJobRegistry,
    logger: &'a JobLogger,
    job_id: &'a JobId,
    progress: JobProgress,
}

impl StepTracker<'_> {
    async fn start(&mut self) -> EngineResult<()> {
        self.write().await
    }

    async fn enter(&mut self, step: JobStep) -> EngineResult<()> {
        if !self.progress.advance(step) {
            return Ok(());
        }
        self.logger.log_step(step, self.progress.progress());
        self.write().await
    }

    async fn within(&mut self, fraction: f64) -> EngineResult<()> {
        let before = self.progress.progress();
        if self.progress.raise_within_step(fraction) > before {
            self.write().await?;
        }
        Ok(())
    }

    async fn write(&self) -> EngineResult<()> {
        let (step, progress) = (self.progress.step(), self.progress.progress());
        self.jobs
            .update_status(self.job_id, &StatusUpdate::processing(step, progress))
            .await
            .map_err(|e| finalized(e, self.job_id))?;
        self.registry.update(self.job_id, step, progress).await;
        Ok(())
    }
}

fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}

/// Runs generation jobs. Constructed once at startup and shared.
pub struct JobOrchestrator {
    stores: StoreSet,
    providers: ProviderSet,
    toolchain: Arc<dyn MediaToolchain>,
    artifacts: Arc<dyn ArtifactStore>,
    limiter: CallLimiter,
    retry: CallRetry,
    generator: ChunkGenerator,
    compositor: Compositor,
    registry: ActiveJobRegistry,
    config: EngineConfig,
}

impl JobOrchestrator {
    pub fn new(
        stores: StoreSet,
        providers: ProviderSet,
        toolchain: Arc<dyn MediaToolchain>,
        artifacts: Arc<dyn ArtifactStore>,
        limiter: CallLimiter,
        config: EngineConfig,
    ) -> Self {
        let retry = CallRetry::new(config.call_retries, config.retry_base_delay);
        let toolchain: Arc<dyn MediaToolchain> =
            Arc::new(ProcessLimitedToolchain::new(toolchain, config.max_ffmpeg_processes));
        let generator = ChunkGenerator::new(
            toolchain.clone(),
            artifacts.clone(),
            providers.speech.clone(),
            providers.avatar.clone(),
            limiter.clone(),
            retry,
        );
        let compositor = Compositor::new(
            toolchain.clone(),
            artifacts.clone(),
            config.pip_scale,
            config.pip_corner,
        );
        Self {
            stores,
            providers,
            toolchain,
            artifacts,
            limiter,
            retry,
            generator,
            compositor,
            registry: ActiveJobRegistry::new(),
            config,
        }
    }

    pub fn registry(&self) -> &ActiveJobRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `job` as a background task tracked by the registry.
    pub async fn spawn(self: &Arc<Self>, job: Job) {
        self.registry.register(&job).await;
        let id = job.id.clone();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // The outcome is recorded on the job itself
            let _ = this.run(job).await;
        });
        self.registry.attach(&id, handle).await;
    }

    /// Run every stage of `job` and record the outcome on the job.
    ///
    /// Returns the final video URL on success.
    pub async fn run(&self, job: Job) -> EngineResult<String> {
        let operation = if job.source_job.is_some() { "regenerate" } else { "generate" };
        let logger = JobLogger::new(&job.id, operation);
        let started = Instant::now();
        let work_dir = self.config.work_dir.join(job.id.as_str());
        metrics::record_job_started();
        logger.log_start(&format!(
            "story {} with {} enabled speaker(s)",
            job.story_id,
            job.enabled_speakers().count()
        ));

        let mut tracker = StepTracker {
            jobs: self.stores.jobs.as_ref(),
            registry: &self.registry,
            logger: &logger,
            job_id: &job.id,
            progress: JobProgress::resume(job.step, job.progress),
        };
        let result = self
            .execute(&job, &work_dir, &logger, &mut tracker)
            .instrument(logger.span())
            .await;

        let status = match &result {
            Ok(url) => {
                logger.log_completion(url);
                "completed"
            }
            Err(EngineError::JobFinalized(_)) => {
                logger.log_warning("job was finalized elsewhere, discarding results");
                "discarded"
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                match self
                    .stores
                    .jobs
                    .update_status(&job.id, &StatusUpdate::failed(e.to_string()))
                    .await
                {
                    Ok(()) | Err(StoreError::InvalidTransition(_)) => {}
                    Err(store_error) => {
                        logger.log_error(&format!("could not record failure: {}", store_error))
                    }
                }
                "failed"
            }
        };
        metrics::record_job_finished(status, started.elapsed().as_secs_f64());

        if !self.config.keep_work_dirs {
            if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(job_id = %job.id, error = %e, "Failed to remove work directory");
                }
            }
        }
        self.registry.remove(&job.id).await;
        result
    }

    async fn execute(
        &self,
        job: &Job,
        work_dir: &Path,
        logger: &JobLogger,
        tracker: &mut StepTracker<'_>,
    ) -> EngineResult<String> {
        tracker.start().await?;
        tokio::fs::create_dir_all(work_dir).await?;

        let source = work_dir.join("source_video.mp4");
        self.artifacts.download(&job.source_video_url, &source).await?;

        let background = match &job.source_job {
            None => self.prepare(job, work_dir, &source, logger, tracker).await?,
            Some(source_job) => self.reuse(job, source_job, work_dir, logger).await?,
        };

        let total_duration = self.toolchain.probe_duration(&source).await?;
        let segments = self.stores.subtitles.list(&job.id, false).await?;
        let chunks = plan_chunks(
            &segments,
            total_duration,
            self.config.segmentation.max_chunk_duration,
        );
        self.stores
            .jobs
            .update_field(&job.id, "chunk_count", serde_json::json!(chunks.len()))
            .await
            .map_err(|e| finalized(e, &job.id))?;
        logger.log_progress(&format!(
            "{} segments in {} chunks over {:.1}s",
            segments.len(),
            chunks.len(),
            total_duration
        ));

        let mut failed: BTreeSet<u32> = BTreeSet::new();

        // Voice
        tracker.enter(JobStep::GeneratingVoice).await?;
        let mut voiced: Vec<ChunkAudio> = Vec::with_capacity(chunks.len());
        {
            let background = background.as_deref();
            let mut pending: FuturesUnordered<_> = chunks
                .iter()
                .map(|chunk| async move {
                    let result = self
                        .generator
                        .generate_audio(job, chunk, work_dir, background)
                        .await;
                    (chunk.index, result)
                })
                .collect();
            let mut done = 0;
            while let Some((index, result)) = pending.next().await {
                done += 1;
                match result {
                    Ok(audio) => {
                        self.record_artifact(&job.id, &artifact_keys::chunk_audio(index), &audio.audio_url)
                            .await?;
                        voiced.push(audio);
                    }
                    Err(e) => {
                        logger.log_chunk_warning(index, &format!("dropped: {}", e));
                        metrics::record_chunk("dropped");
                        failed.insert(index);
                    }
                }
                tracker.within(fraction(done, chunks.len())).await?;
            }
        }
        voiced.sort_by_key(|a| a.chunk.index);

        // Avatars
        let mut avatars: HashMap<u32, ChunkAvatars> = HashMap::new();
        if job.wants_avatar() && !voiced.is_empty() {
            tracker.enter(JobStep::GeneratingAvatar).await?;
            let mut pending: FuturesUnordered<_> = voiced
                .iter()
                .map(|audio| async move {
                    (audio.chunk.index, self.generator.generate_avatars(job, audio).await)
                })
                .collect();
            let mut done = 0;
            while let Some((index, outcome)) = pending.next().await {
                done += 1;
                for avatar in &outcome.avatars {
                    self.record_artifact(
                        &job.id,
                        &artifact_keys::chunk_avatar(index, &avatar.label),
                        &avatar.url,
                    )
                    .await?;
                }
                if !outcome.failed.is_empty() {
                    logger.log_chunk_warning(
                        index,
                        &format!("avatar failed for {}, compositing audio-only", outcome.failed.join(", ")),
                    );
                }
                avatars.insert(index, outcome);
                tracker.within(fraction(done, voiced.len())).await?;
            }
        }

        // Compositing
        tracker.enter(JobStep::CompositingVideo).await?;
        let mut segments_out: Vec<ChunkSegment> = Vec::with_capacity(voiced.len());
        for (i, audio) in voiced.iter().enumerate() {
            let index = audio.chunk.index;
            let outcome = avatars.get(&index);
            let wanted_pip = outcome
                .map(|o| !o.avatars.is_empty() || !o.failed.is_empty())
                .unwrap_or(false);
            let layers: &[SpeakerAvatar] = match outcome {
                Some(o) if o.is_complete() => &o.avatars,
                _ => &[],
            };

            match self
                .compositor
                .composite_chunk(&job.id, &source, audio, layers, wanted_pip)
                .await
            {
                Ok(segment) => {
                    self.record_artifact(&job.id, &artifact_keys::chunk_segment(index), &segment.url)
                        .await?;
                    if segment.fell_back {
                        failed.insert(index);
                        metrics::record_chunk("audio_only");
                    } else {
                        metrics::record_chunk(segment.mode.as_str());
                    }
                    segments_out.push(segment);
                }
                Err(e) => {
                    logger.log_chunk_warning(index, &format!("compositing failed: {}", e));
                    metrics::record_chunk("dropped");
                    failed.insert(index);
                }
            }
            tracker.within(fraction(i + 1, voiced.len())).await?;
        }

        if !failed.is_empty() {
            self.stores
                .jobs
                .update_field(&job.id, "failed_chunks", serde_json::json!(failed))
                .await
                .map_err(|e| finalized(e, &job.id))?;
        }
        let url = self
            .compositor
            .finalize(&job.id, &segments_out, work_dir)
            .await?;
        self.stores
            .jobs
            .complete(&job.id, &url)
            .await
            .map_err(|e| finalized(e, &job.id))?;
        Ok(url)
    }

    /// Extract, separate and transcribe. Returns the local background track.
    async fn prepare(
        &self,
        job: &Job,
        work_dir: &Path,
        source: &Path,
        logger: &JobLogger,
        tracker: &mut StepTracker<'_>,
    ) -> EngineResult<Option<PathBuf>> {
        let job_key = job.id.as_str();

        tracker.enter(JobStep::ExtractingAudio).await?;
        let extracted = work_dir.join("extracted.wav");
        self.toolchain.extract_audio(source, &extracted).await?;
        let extracted_url = self
            .artifacts
            .upload(&extracted, &keys::extracted_audio(job_key))
            .await?;
        self.record_artifact(&job.id, artifact_keys::EXTRACTED_AUDIO, &extracted_url)
            .await?;

        tracker.enter(JobStep::SeparatingVocals).await?;
        let separator = self.providers.separator.as_ref();
        let limiter = &self.limiter;
        let audio_url = extracted_url.as_str();
        let separated = self
            .retry
            .run("separation", move || limiter.run("separation", separator.separate(audio_url)))
            .await;

        let (transcribe_url, background) = match separated {
            Ok(stems) => {
                let mut fields = HashMap::new();
                fields.insert(
                    format!("artifacts.{}", artifact_keys::VOCALS),
                    serde_json::json!(stems.vocals_url),
                );
                fields.insert(
                    format!("artifacts.{}", artifact_keys::BACKGROUND),
                    serde_json::json!(stems.background_url),
                );
                self.stores
                    .jobs
                    .update_fields(&job.id, fields)
                    .await
                    .map_err(|e| finalized(e, &job.id))?;

                let background = work_dir.join("background.wav");
                let background = match self.artifacts.download(&stems.background_url, &background).await {
                    Ok(()) => Some(background),
                    Err(e) => {
                        logger.log_warning(&format!("background download failed: {}", e));
                        None
                    }
                };
                (stems.vocals_url, background)
            }
            Err(e) => {
                logger.log_warning(&format!(
                    "vocal separation failed, continuing with unseparated audio: {}",
                    e
                ));
                (extracted_url.clone(), None)
            }
        };

        tracker.enter(JobStep::Transcribing).await?;
        let transcriber = self.providers.transcriber.as_ref();
        let url = transcribe_url.as_str();
        let language = job.language.as_str();
        let transcription = self
            .retry
            .run("transcription", move || {
                limiter.run("transcription", transcriber.transcribe(url, language))
            })
            .await?;

        let transcript_path = work_dir.join("transcript.json");
        tokio::fs::write(&transcript_path, serde_json::to_vec_pretty(&transcription)?).await?;
        let transcript_url = self
            .artifacts
            .upload(&transcript_path, &keys::transcript(job_key))
            .await?;
        self.record_artifact(&job.id, artifact_keys::TRANSCRIPT, &transcript_url)
            .await?;

        let mut segments = build_segments(&transcription, &self.config.segmentation);
        if let Some(analysis) = self
            .stores
            .stories
            .get_story(&job.story_id)
            .await?
            .and_then(|story| story.analysis)
        {
            attribute_speakers(&mut segments, &analysis);
        }
        if segments.is_empty() {
            logger.log_warning("transcription found no speech");
        }
        self.stores.subtitles.replace_all(&job.id, &segments).await?;
        logger.log_progress(&format!("transcribed {} segments", segments.len()));

        Ok(background)
    }

    /// Fetch the prepared inputs a regenerated job inherits.
    async fn reuse(
        &self,
        job: &Job,
        source_job: &JobId,
        work_dir: &Path,
        logger: &JobLogger,
    ) -> EngineResult<Option<PathBuf>> {
        if job.artifact(artifact_keys::EXTRACTED_AUDIO).is_none() {
            return Err(EngineError::missing_artifact(artifact_keys::EXTRACTED_AUDIO));
        }
        logger.log_progress(&format!("reusing prepared inputs of job {}", source_job));

        match job.artifact(artifact_keys::BACKGROUND) {
            Some(url) => {
                let background = work_dir.join("background.wav");
                self.artifacts.download(url, &background).await?;
                Ok(Some(background))
            }
            None => {
                debug!(job_id = %job.id, "No background track to reuse");
                Ok(None)
            }
        }
    }

    async fn record_artifact(&self, job_id: &JobId, key: &str, url: &str) -> EngineResult<()> {
        self.stores
            .jobs
            .update_field(job_id, &format!("artifacts.{}", key), serde_json::json!(url))
            .await
            .map_err(|e| finalized(e, job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction() {
        assert_eq!(fraction(0, 0), 1.0);
        assert_eq!(fraction(1, 4), 0.25);
    }

    #[test]
    fn test_invalid_transition_means_finalized() {
        let id = JobId::from_string("j1");
        assert!(matches!(
            finalized(StoreError::invalid_transition("terminal"), &id),
            EngineError::JobFinalized(_)
        ));
        assert!(matches!(
            finalized(StoreError::not_found("jobs/j1"), &id),
            EngineError::Store(_)
        ));
    }
}
