//! Produced interface: story, job, subtitle and queue operations.
//!
//! Every input check runs here, before a job record exists. Callers pass
//! the authenticated owner; records owned by someone else read as missing.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;
use validator::Validate;

use storyvox_models::{
    artifact_keys, AnalysisTask, Job, JobId, JobPage, QueueStatus, SpeakerConfig, Story, StoryId,
    TranscriptSegment,
};
use storyvox_queue::{AnalysisQueue, QueueError};
use storyvox_store::{StoreError, StoreSet};

use crate::error::{EngineError, EngineResult};
use crate::orchestrator::JobOrchestrator;
use crate::registry::ActiveJob;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateStoryRequest {
    #[serde(default)]
    #[validate(length(max = 200, message = "title is too long"))]
    pub title: Option<String>,

    #[serde(default)]
    #[validate(url(message = "video_url must be a URL"))]
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateJobRequest {
    pub story_id: StoryId,

    #[validate(length(min = 1, message = "at least one speaker config is required"), nested)]
    pub speakers: Vec<SpeakerConfig>,

    #[serde(default)]
    #[validate(length(min = 2, max = 8, message = "language must be a language code"))]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnqueueAnalysisRequest {
    /// Defaults to the story's video
    #[serde(default)]
    pub video_path: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn validation_error(errors: validator::ValidationErrors) -> EngineError {
    EngineError::invalid_input(errors.to_string())
}

fn store_input_error(error: StoreError) -> EngineError {
    match error {
        StoreError::InvalidArgument(msg) => EngineError::InvalidInput(msg),
        other => other.into(),
    }
}

/// Check speaker configs against the story they will voice.
pub fn validate_speakers(speakers: &[SpeakerConfig], story: &Story) -> EngineResult<()> {
    let enabled: Vec<&SpeakerConfig> = speakers.iter().filter(|s| s.enabled).collect();
    if enabled.is_empty() {
        return Err(EngineError::invalid_input("at least one speaker must be enabled"));
    }

    let mut seen = HashSet::new();
    for speaker in speakers {
        let label = speaker.speaker_label.as_deref();
        if !seen.insert(label) {
            return Err(EngineError::invalid_input(format!(
                "duplicate speaker config for '{}'",
                speaker.display_label()
            )));
        }
        if let Some(avatar) = &speaker.avatar {
            if avatar.face_bbox.is_some_and(|b| b.is_empty())
                || avatar.ext_bbox.is_some_and(|b| b.is_empty())
            {
                return Err(EngineError::invalid_input(format!(
                    "avatar bounding box for '{}' is empty",
                    speaker.display_label()
                )));
            }
        }
    }

    if enabled.len() > 1 && enabled.iter().any(|s| s.speaker_label.is_none()) {
        return Err(EngineError::invalid_input(
            "every enabled speaker needs a speaker_label when more than one is enabled",
        ));
    }

    for label in speakers.iter().filter_map(|s| s.speaker_label.as_deref()) {
        let known = story
            .analysis
            .as_ref()
            .is_some_and(|analysis| analysis.has_speaker(label));
        if !known {
            return Err(EngineError::invalid_input(format!(
                "unknown speaker label '{}'",
                label
            )));
        }
    }
    Ok(())
}

/// Entry point for the HTTP layer.
#[derive(Clone)]
pub struct StoryService {
    stores: StoreSet,
    orchestrator: Arc<JobOrchestrator>,
    queue: AnalysisQueue,
}

impl StoryService {
    pub fn new(stores: StoreSet, orchestrator: Arc<JobOrchestrator>, queue: AnalysisQueue) -> Self {
        Self {
            stores,
            orchestrator,
            queue,
        }
    }

    // ========================================================================
    // Stories
    // ========================================================================

    pub async fn create_story(&self, owner: &str, request: CreateStoryRequest) -> EngineResult<Story> {
        request.validate().map_err(validation_error)?;
        let mut story = Story::new(StoryId::new(), owner, request.video_url);
        story.title = request.title;
        self.stores.stories.put_story(&story).await?;
        info!(story_id = %story.id, owner, "Story created");
        Ok(story)
    }

    pub async fn get_story(&self, owner: &str, story_id: &StoryId) -> EngineResult<Story> {
        self.stores
            .stories
            .get_story(story_id)
            .await?
            .filter(|s| s.owner == owner)
            .ok_or_else(|| EngineError::not_found(format!("story {}", story_id)))
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Validate the request, persist a pending job and start it.
    pub async fn create_job(&self, owner: &str, request: CreateJobRequest) -> EngineResult<JobId> {
        let story = self.get_story(owner, &request.story_id).await?;
        let video_url = story
            .video_url
            .clone()
            .ok_or_else(|| EngineError::invalid_input(format!("story {} has no video", story.id)))?;
        request.validate().map_err(validation_error)?;
        validate_speakers(&request.speakers, &story)?;

        let mut job = Job::new(owner, story.id.clone(), video_url, request.speakers);
        if let Some(language) = request.language {
            job = job.with_language(language);
        }
        self.stores.jobs.create(&job).await?;
        info!(job_id = %job.id, story_id = %story.id, "Job created");

        let id = job.id.clone();
        self.orchestrator.spawn(job).await;
        Ok(id)
    }

    pub async fn get_job(&self, owner: &str, job_id: &JobId) -> EngineResult<Job> {
        self.stores
            .jobs
            .get(job_id)
            .await?
            .filter(|j| j.owner == owner)
            .ok_or_else(|| EngineError::not_found(format!("job {}", job_id)))
    }

    pub async fn list_jobs(&self, owner: &str, page: u32, page_size: u32) -> EngineResult<JobPage> {
        if page == 0 {
            return Err(EngineError::invalid_input("page starts at 1"));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(EngineError::invalid_input(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(self.stores.jobs.list_by_owner(owner, page, page_size).await?)
    }

    /// Start a new job from a finished one, reusing its prepared audio and
    /// its current subtitle selection.
    pub async fn regenerate_job(&self, owner: &str, job_id: &JobId) -> EngineResult<JobId> {
        let source = self.get_job(owner, job_id).await?;
        if !source.is_terminal() {
            return Err(EngineError::conflict(format!("job {} is still running", job_id)));
        }
        if source.artifact(artifact_keys::EXTRACTED_AUDIO).is_none() {
            return Err(EngineError::conflict(format!(
                "job {} has no prepared audio to reuse",
                job_id
            )));
        }

        let job = Job::regenerate_from(&source);
        let subtitles = self.stores.subtitles.list(&source.id, false).await?;
        self.stores.jobs.create(&job).await?;
        self.stores.subtitles.replace_all(&job.id, &subtitles).await?;
        info!(job_id = %job.id, source_job = %source.id, "Job regenerated");

        let id = job.id.clone();
        self.orchestrator.spawn(job).await;
        Ok(id)
    }

    pub async fn list_active_jobs(&self) -> Vec<ActiveJob> {
        self.orchestrator.registry().snapshot().await
    }

    // ========================================================================
    // Subtitles
    // ========================================================================

    pub async fn get_subtitles(&self, owner: &str, job_id: &JobId) -> EngineResult<Vec<TranscriptSegment>> {
        let job = self.get_job(owner, job_id).await?;
        Ok(self.stores.subtitles.list(&job.id, false).await?)
    }

    /// Mark exactly `indices` as selected.
    pub async fn update_subtitle_selection(
        &self,
        owner: &str,
        job_id: &JobId,
        indices: &[u32],
    ) -> EngineResult<()> {
        let job = self.get_job(owner, job_id).await?;
        self.stores
            .subtitles
            .update_selection(&job.id, indices)
            .await
            .map_err(store_input_error)
    }

    // ========================================================================
    // Analysis queue
    // ========================================================================

    /// Queue a story for analysis and return the queue depth.
    pub async fn enqueue_analysis(
        &self,
        owner: &str,
        story_id: &StoryId,
        request: EnqueueAnalysisRequest,
    ) -> EngineResult<usize> {
        let story = self.get_story(owner, story_id).await?;
        let video_path = request
            .video_path
            .filter(|p| !p.trim().is_empty())
            .or(story.video_url)
            .ok_or_else(|| EngineError::invalid_input(format!("story {} has no video", story_id)))?;

        let mut task = AnalysisTask::new(story.id, video_path);
        if let Some(key) = request.api_key.filter(|k| !k.is_empty()) {
            task = task.with_api_key(key);
        }
        self.queue.enqueue(task).await.map_err(|e| match e {
            QueueError::AlreadyQueued(id) => {
                EngineError::conflict(format!("story {} is already queued for analysis", id))
            }
            QueueError::StoryNotFound(id) => EngineError::not_found(format!("story {}", id)),
            other => other.into(),
        })
    }

    pub async fn queue_status(&self) -> QueueStatus {
        self.queue.status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use storyvox_models::{AvatarRef, BoundingBox, SpeakerProfile, StoryAnalysis};

    fn story_with(labels: &[&str]) -> Story {
        let mut story = Story::new(
            StoryId::from_string("s1"),
            "u1",
            Some("https://cdn.example.com/s1.mp4".to_string()),
        );
        story.analysis = Some(StoryAnalysis {
            title: "t".to_string(),
            description: "d".to_string(),
            speakers: labels
                .iter()
                .map(|l| SpeakerProfile {
                    label: l.to_string(),
                    description: None,
                    speech_share: 0.0,
                })
                .collect(),
            spans: Vec::new(),
            analyzed_at: Utc::now(),
        });
        story
    }

    fn input_message(result: EngineResult<()>) -> String {
        match result {
            Err(EngineError::InvalidInput(msg)) => msg,
            other => panic!("expected invalid input, got {:?}", other),
        }
    }

    #[test]
    fn test_single_unlabelled_speaker_is_valid() {
        let story = Story::new(StoryId::from_string("s1"), "u1", None);
        assert!(validate_speakers(&[SpeakerConfig::narrator("v1")], &story).is_ok());
    }

    #[test]
    fn test_no_enabled_speaker() {
        let mut speaker = SpeakerConfig::narrator("v1");
        speaker.enabled = false;
        let msg = input_message(validate_speakers(&[speaker], &story_with(&[])));
        assert!(msg.contains("enabled"));
    }

    #[test]
    fn test_multi_speaker_needs_labels() {
        let story = story_with(&["fox"]);
        let speakers = vec![
            SpeakerConfig::narrator("v1").with_label("fox"),
            SpeakerConfig::narrator("v2"),
        ];
        assert!(input_message(validate_speakers(&speakers, &story)).contains("speaker_label"));
    }

    #[test]
    fn test_unknown_label_rejected() {
        let story = story_with(&["fox", "owl"]);
        let speakers = vec![
            SpeakerConfig::narrator("v1").with_label("fox"),
            SpeakerConfig::narrator("v2").with_label("bear"),
        ];
        assert!(input_message(validate_speakers(&speakers, &story)).contains("bear"));

        let unanalyzed = Story::new(StoryId::from_string("s2"), "u1", None);
        let labelled = vec![SpeakerConfig::narrator("v1").with_label("fox")];
        assert!(validate_speakers(&labelled, &unanalyzed).is_err());
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let story = story_with(&["fox"]);
        let speakers = vec![
            SpeakerConfig::narrator("v1").with_label("fox"),
            SpeakerConfig::narrator("v2").with_label("fox"),
        ];
        assert!(input_message(validate_speakers(&speakers, &story)).contains("duplicate"));
    }

    #[test]
    fn test_empty_bbox_rejected() {
        let story = story_with(&[]);
        let speaker = SpeakerConfig::narrator("v1").with_avatar(AvatarRef {
            avatar_id: "a1".to_string(),
            image_url: "https://cdn.example.com/a1.png".to_string(),
            face_bbox: Some(BoundingBox::new(10, 10, 10, 40)),
            ext_bbox: None,
        });
        assert!(input_message(validate_speakers(&[speaker], &story)).contains("bounding box"));
    }

    #[test]
    fn test_request_validation() {
        let request = CreateJobRequest {
            story_id: StoryId::from_string("s1"),
            speakers: vec![SpeakerConfig::narrator("")],
            language: None,
        };
        assert!(request.validate().is_err());

        let empty = CreateJobRequest {
            story_id: StoryId::from_string("s1"),
            speakers: Vec::new(),
            language: Some("en".to_string()),
        };
        assert!(empty.validate().is_err());
    }
}
