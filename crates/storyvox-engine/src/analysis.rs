//! Story analysis pipeline run by the analysis queue worker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use storyvox_media::MediaToolchain;
use storyvox_models::{AnalysisTask, SpeakerProfile, SpeakerSpan, StoryAnalysis, TranscriptSegment};
use storyvox_providers::{CallLimiter, Classification, SpeakerClassifier, Transcriber};
use storyvox_queue::{AnalysisPipeline, PipelineError};
use storyvox_storage::{keys, ArtifactStore};

use crate::config::{EngineConfig, SegmentationConfig};
use crate::error::EngineResult;
use crate::retry::CallRetry;
use crate::segmentation::build_segments;

/// Extract → transcribe → classify for one story.
pub struct StoryAnalysisPipeline {
    toolchain: Arc<dyn MediaToolchain>,
    artifacts: Arc<dyn ArtifactStore>,
    transcriber: Arc<dyn Transcriber>,
    classifier: Arc<dyn SpeakerClassifier>,
    limiter: CallLimiter,
    retry: CallRetry,
    segmentation: SegmentationConfig,
    language: String,
    work_dir: PathBuf,
    single_speaker_threshold: f64,
}

impl StoryAnalysisPipeline {
    pub fn new(
        toolchain: Arc<dyn MediaToolchain>,
        artifacts: Arc<dyn ArtifactStore>,
        transcriber: Arc<dyn Transcriber>,
        classifier: Arc<dyn SpeakerClassifier>,
        limiter: CallLimiter,
        config: &EngineConfig,
        single_speaker_threshold: f64,
    ) -> Self {
        Self {
            toolchain,
            artifacts,
            transcriber,
            classifier,
            limiter,
            retry: CallRetry::new(config.call_retries, config.retry_base_delay),
            segmentation: config.segmentation,
            language: config.analysis_language.clone(),
            work_dir: config.work_dir.join("analysis"),
            single_speaker_threshold,
        }
    }

    async fn run(&self, task: &AnalysisTask, work_dir: &Path) -> EngineResult<StoryAnalysis> {
        let story_key = task.story_id.as_str();
        tokio::fs::create_dir_all(work_dir).await?;

        let video = if is_remote(&task.video_path) {
            let local = work_dir.join("source_video.mp4");
            self.artifacts.download(&task.video_path, &local).await?;
            local
        } else {
            PathBuf::from(&task.video_path)
        };

        let audio = work_dir.join("audio.wav");
        self.toolchain.extract_audio(&video, &audio).await?;
        let audio_url = self
            .artifacts
            .upload(&audio, &keys::analysis_audio(story_key))
            .await?;

        let transcriber = self.transcriber.as_ref();
        let limiter = &self.limiter;
        let url = audio_url.as_str();
        let language = self.language.as_str();
        let transcription = self
            .retry
            .run("transcription", move || {
                limiter.run("transcription", transcriber.transcribe(url, language))
            })
            .await?;
        let segments = build_segments(&transcription, &self.segmentation);
        debug!(story_id = %task.story_id, segments = segments.len(), "Transcribed story");

        // Single attempt: rate limits are retried by the queue with backoff
        let classification = self
            .limiter
            .run(
                "classification",
                self.classifier
                    .classify(&segments, task.api_key_override.as_deref()),
            )
            .await?;

        let mut analysis = assemble_analysis(classification, &segments);
        analysis.recompute_shares();
        if let Some(kept) = analysis.collapse_dominant_speaker(self.single_speaker_threshold) {
            info!(story_id = %task.story_id, speaker = %kept, "Collapsed to dominant speaker");
        }
        Ok(analysis)
    }
}

#[async_trait]
impl AnalysisPipeline for StoryAnalysisPipeline {
    async fn analyze(&self, task: &AnalysisTask) -> Result<StoryAnalysis, PipelineError> {
        let work_dir = self.work_dir.join(task.story_id.as_str());
        let result = self.run(task, &work_dir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(story_id = %task.story_id, error = %e, "Failed to remove analysis work directory");
            }
        }
        Ok(result?)
    }
}

fn is_remote(path: &str) -> bool {
    path.contains("://")
}

/// Turn segment assignments into timed spans.
///
/// Assignments pointing at unknown segments are ignored; labels the model
/// assigned without listing them become speakers.
fn assemble_analysis(classification: Classification, segments: &[TranscriptSegment]) -> StoryAnalysis {
    let by_index: HashMap<u32, &TranscriptSegment> = segments.iter().map(|s| (s.index, s)).collect();

    let mut speakers: Vec<SpeakerProfile> = classification
        .speakers
        .into_iter()
        .map(|s| SpeakerProfile {
            label: s.label,
            description: s.description,
            speech_share: 0.0,
        })
        .collect();

    let mut spans = Vec::with_capacity(classification.assignments.len());
    for assignment in classification.assignments {
        let Some(segment) = by_index.get(&assignment.index) else {
            debug!(index = assignment.index, "Assignment for unknown segment");
            continue;
        };
        if !speakers.iter().any(|s| s.label == assignment.speaker) {
            speakers.push(SpeakerProfile {
                label: assignment.speaker.clone(),
                description: None,
                speech_share: 0.0,
            });
        }
        spans.push(SpeakerSpan {
            start: segment.start,
            end: segment.end,
            speaker: assignment.speaker,
        });
    }
    spans.sort_by(|a, b| a.start.total_cmp(&b.start));

    StoryAnalysis {
        title: classification.title,
        description: classification.description,
        speakers,
        spans,
        analyzed_at: Utc::now(),
    }
}
