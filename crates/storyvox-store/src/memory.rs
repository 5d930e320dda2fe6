//! In-memory store for local runs and tests.
//!
//! Holds the same invariants as the Firestore backend: terminal jobs reject
//! status writes, protected fields reject generic writes, and a multi-field
//! update either applies completely or not at all.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use storyvox_models::{
    AnalysisState, Job, JobId, JobPage, JobStatus, StatusUpdate, Story, StoryAnalysis, StoryId,
    TranscriptSegment,
};

use crate::contract::{apply_field_writes, JobStore, StoryStore, SubtitleStore};
use crate::metrics::{record_analysis_state, record_job_status};
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    subtitles: RwLock<HashMap<JobId, Vec<TranscriptSegment>>>,
    stories: RwLock<HashMap<StoryId, Story>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: &Job) -> StoreResult<JobId> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(format!("jobs/{}", job.id)));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(job.id.clone())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update_status(&self, id: &JobId, update: &StatusUpdate) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("jobs/{}", id)))?;
        job.apply_status(update).map_err(StoreError::InvalidTransition)?;
        record_job_status(job.status);
        Ok(())
    }

    async fn update_field(
        &self,
        id: &JobId,
        name: &str,
        value: serde_json::Value,
    ) -> StoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert(name.to_string(), value);
        self.update_fields(id, fields).await
    }

    async fn update_fields(
        &self,
        id: &JobId,
        fields: HashMap<String, serde_json::Value>,
    ) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("jobs/{}", id)))?;
        *job = apply_field_writes(job, &fields)?;
        debug!(job_id = %id, fields = fields.len(), "Updated job fields");
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str, page: u32, page_size: u32) -> StoreResult<JobPage> {
        if page == 0 || page_size == 0 {
            return Err(StoreError::invalid_argument(
                "page and page_size must be at least 1",
            ));
        }
        let jobs = self.jobs.read().await;
        let mut owned: Vec<&Job> = jobs.values().filter(|j| j.owner == owner).collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = owned.len() as u64;
        let items = owned
            .into_iter()
            .skip(((page - 1) as usize).saturating_mul(page_size as usize))
            .take(page_size as usize)
            .cloned()
            .collect();
        Ok(JobPage {
            items,
            total,
            page,
            page_size,
        })
    }

    async fn complete(&self, id: &JobId, final_video_url: &str) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("jobs/{}", id)))?;
        job.apply_completion(final_video_url)
            .map_err(StoreError::InvalidTransition)?;
        record_job_status(job.status);
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus, limit: u32) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<&Job> = jobs.values().filter(|j| j.status == status).collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching
            .into_iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SubtitleStore for MemoryStore {
    async fn replace_all(&self, job_id: &JobId, segments: &[TranscriptSegment]) -> StoreResult<()> {
        let mut sorted = segments.to_vec();
        sorted.sort_by_key(|s| s.index);
        if sorted.windows(2).any(|w| w[0].index == w[1].index) {
            return Err(StoreError::invalid_argument("duplicate segment index"));
        }
        self.subtitles.write().await.insert(job_id.clone(), sorted);
        Ok(())
    }

    async fn list(&self, job_id: &JobId, only_selected: bool) -> StoreResult<Vec<TranscriptSegment>> {
        let subtitles = self.subtitles.read().await;
        Ok(subtitles
            .get(job_id)
            .map(|segments| {
                segments
                    .iter()
                    .filter(|s| !only_selected || s.selected)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_selection(&self, job_id: &JobId, selected: &[u32]) -> StoreResult<()> {
        let mut subtitles = self.subtitles.write().await;
        let segments = subtitles.entry(job_id.clone()).or_default();

        let unknown: Vec<u32> = selected
            .iter()
            .copied()
            .filter(|i| !segments.iter().any(|s| s.index == *i))
            .collect();
        if !unknown.is_empty() {
            return Err(StoreError::invalid_argument(format!(
                "unknown segment indices: {:?}",
                unknown
            )));
        }

        for segment in segments.iter_mut() {
            segment.selected = selected.contains(&segment.index);
        }
        Ok(())
    }
}

#[async_trait]
impl StoryStore for MemoryStore {
    async fn get_story(&self, id: &StoryId) -> StoreResult<Option<Story>> {
        Ok(self.stories.read().await.get(id).cloned())
    }

    async fn put_story(&self, story: &Story) -> StoreResult<()> {
        self.stories
            .write()
            .await
            .insert(story.id.clone(), story.clone());
        Ok(())
    }

    async fn set_analysis_state(&self, id: &StoryId, state: AnalysisState) -> StoreResult<()> {
        let mut stories = self.stories.write().await;
        let story = stories
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("stories/{}", id)))?;
        story.analysis_state = state;
        if state.is_active() {
            story.analysis_error = None;
        }
        story.updated_at = Utc::now();
        record_analysis_state(state);
        Ok(())
    }

    async fn save_analysis(&self, id: &StoryId, analysis: &StoryAnalysis) -> StoreResult<()> {
        let mut stories = self.stories.write().await;
        let story = stories
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("stories/{}", id)))?;
        story.analysis = Some(analysis.clone());
        story.analysis_state = AnalysisState::Completed;
        story.analysis_error = None;
        story.updated_at = Utc::now();
        record_analysis_state(AnalysisState::Completed);
        Ok(())
    }

    async fn fail_analysis(&self, id: &StoryId, error: &str) -> StoreResult<()> {
        let mut stories = self.stories.write().await;
        let story = stories
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("stories/{}", id)))?;
        story.analysis_state = AnalysisState::Failed;
        story.analysis_error = Some(error.to_string());
        story.updated_at = Utc::now();
        record_analysis_state(AnalysisState::Failed);
        Ok(())
    }
}
