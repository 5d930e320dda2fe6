//! Generation job record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::{JobStatus, JobStep, SpeakerConfig, StoryId};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known keys in [`Job::artifacts`].
pub mod artifact_keys {
    pub const EXTRACTED_AUDIO: &str = "extracted_audio";
    pub const VOCALS: &str = "vocals";
    pub const BACKGROUND: &str = "background";
    pub const TRANSCRIPT: &str = "transcript";

    pub fn chunk_audio(chunk: u32) -> String {
        format!("chunk_{}_audio", chunk)
    }

    pub fn chunk_avatar(chunk: u32, speaker: &str) -> String {
        format!("chunk_{}_avatar_{}", chunk, speaker)
    }

    pub fn chunk_segment(chunk: u32) -> String {
        format!("chunk_{}_segment", chunk)
    }
}

/// A story generation job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Owning user
    pub owner: String,

    /// Source story
    pub story_id: StoryId,

    /// Source video to re-voice
    pub source_video_url: String,

    /// Transcription language
    #[serde(default = "default_language")]
    pub language: String,

    /// One config per speaker (single-speaker jobs have exactly one)
    pub speakers: Vec<SpeakerConfig>,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default)]
    pub step: JobStep,

    /// Progress (0-100), non-decreasing while processing
    #[serde(default)]
    pub progress: u8,

    /// Intermediate artifact URLs keyed by [`artifact_keys`]
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,

    /// Set if and only if status is completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_video_url: Option<String>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Number of chunks planned for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<u32>,

    /// Chunks that fell back to audio-only or were dropped
    #[serde(default)]
    pub failed_chunks: Vec<u32>,

    /// Earlier job this one was regenerated from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_job: Option<JobId>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_language() -> String {
    "en".to_string()
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        owner: impl Into<String>,
        story_id: StoryId,
        source_video_url: impl Into<String>,
        speakers: Vec<SpeakerConfig>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner: owner.into(),
            story_id,
            source_video_url: source_video_url.into(),
            language: default_language(),
            speakers,
            status: JobStatus::Pending,
            step: JobStep::Init,
            progress: 0,
            artifacts: BTreeMap::new(),
            final_video_url: None,
            error: None,
            chunk_count: None,
            failed_chunks: Vec::new(),
            source_job: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Create a pending job that reuses `source`'s prepared inputs.
    pub fn regenerate_from(source: &Job) -> Self {
        let mut job = Self::new(
            source.owner.clone(),
            source.story_id.clone(),
            source.source_video_url.clone(),
            source.speakers.clone(),
        );
        job.language = source.language.clone();
        job.source_job = Some(source.id.clone());
        for key in [
            artifact_keys::EXTRACTED_AUDIO,
            artifact_keys::VOCALS,
            artifact_keys::BACKGROUND,
            artifact_keys::TRANSCRIPT,
        ] {
            if let Some(url) = source.artifacts.get(key) {
                job.artifacts.insert(key.to_string(), url.clone());
            }
        }
        job
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Speakers that take part in generation.
    pub fn enabled_speakers(&self) -> impl Iterator<Item = &SpeakerConfig> {
        self.speakers.iter().filter(|s| s.enabled)
    }

    pub fn is_multi_speaker(&self) -> bool {
        self.enabled_speakers().count() > 1
    }

    pub fn wants_avatar(&self) -> bool {
        self.enabled_speakers().any(|s| s.avatar.is_some())
    }

    pub fn artifact(&self, key: &str) -> Option<&str> {
        self.artifacts.get(key).map(String::as_str)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status update in memory, enforcing the state machine.
    ///
    /// Returns an error message when the transition is not allowed.
    pub fn apply_status(&mut self, update: &StatusUpdate) -> Result<(), String> {
        if !self.status.can_transition_to(update.status) {
            return Err(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, update.status
            ));
        }
        if update.status == JobStatus::Completed {
            return Err("completion must carry a final video URL".to_string());
        }
        let now = Utc::now();
        if self.status == JobStatus::Pending && update.status == JobStatus::Processing {
            self.started_at = Some(now);
        }
        self.status = update.status;
        if let Some(step) = update.step {
            if self.step.can_advance_to(step) {
                self.step = step;
            }
        }
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if update.status == JobStatus::Failed {
            self.completed_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Mark the job completed with its final artifact.
    pub fn apply_completion(&mut self, final_video_url: impl Into<String>) -> Result<(), String> {
        if !self.status.can_transition_to(JobStatus::Completed) {
            return Err(format!("job {} cannot complete from {}", self.id, self.status));
        }
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.step = JobStep::Completed;
        self.progress = 100;
        self.final_video_url = Some(final_video_url.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

/// Status write for the job store's update-status operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<JobStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn processing(step: JobStep, progress: u8) -> Self {
        Self {
            status: JobStatus::Processing,
            progress: Some(progress),
            step: Some(step),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            progress: None,
            step: None,
            error: Some(error.into()),
        }
    }
}

/// One page of an owner's jobs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            "user-1",
            StoryId::from_string("story-1"),
            "https://cdn.example.com/story.mp4",
            vec![SpeakerConfig::narrator("voice-1")],
        )
    }

    #[test]
    fn test_job_creation() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.step, JobStep::Init);
        assert_eq!(job.language, "en");
        assert!(job.final_video_url.is_none());
        assert!(!job.is_multi_speaker());
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = job();
        job.apply_status(&StatusUpdate::processing(JobStep::Transcribing, 25))
            .unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());

        // Regressing step/progress is ignored
        job.apply_status(&StatusUpdate::processing(JobStep::ExtractingAudio, 5))
            .unwrap();
        assert_eq!(job.step, JobStep::Transcribing);
        assert_eq!(job.progress, 25);

        assert!(job
            .apply_status(&StatusUpdate {
                status: JobStatus::Completed,
                progress: Some(100),
                step: None,
                error: None,
            })
            .is_err());

        job.apply_completion("https://cdn.example.com/final.mp4").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.final_video_url.is_some());

        assert!(job.apply_status(&StatusUpdate::failed("late")).is_err());
    }

    #[test]
    fn test_failed_job_has_no_final_url() {
        let mut job = job();
        job.apply_status(&StatusUpdate::failed("extraction failed")).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("extraction failed"));
        assert!(job.final_video_url.is_none());
        assert!(job.apply_completion("x").is_err());
    }

    #[test]
    fn test_regenerate_copies_prepared_inputs_only() {
        let mut source = job();
        source
            .artifacts
            .insert(artifact_keys::VOCALS.into(), "https://r2/vocals.wav".into());
        source
            .artifacts
            .insert(artifact_keys::chunk_audio(0), "https://r2/c0.wav".into());
        source.apply_completion("https://r2/final.mp4").unwrap();

        let regen = Job::regenerate_from(&source);
        assert_ne!(regen.id, source.id);
        assert_eq!(regen.source_job.as_ref(), Some(&source.id));
        assert_eq!(regen.status, JobStatus::Pending);
        assert!(regen.artifact(artifact_keys::VOCALS).is_some());
        assert!(regen.artifact(&artifact_keys::chunk_audio(0)).is_none());
        assert!(regen.final_video_url.is_none());
    }
}
