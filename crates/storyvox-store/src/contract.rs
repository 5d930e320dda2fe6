//! Store contracts shared by the Firestore and in-memory backends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use storyvox_models::{
    AnalysisState, Job, JobId, JobPage, JobStatus, StatusUpdate, Story, StoryAnalysis, StoryId,
    TranscriptSegment,
};

use crate::error::{StoreError, StoreResult};

/// Fields that only dedicated operations may write.
pub const PROTECTED_FIELDS: &[&str] = &["id", "owner", "status", "final_video_url", "completed_at"];

/// Reject generic writes to protected fields.
///
/// Dotted paths are checked by their first segment.
pub fn check_writable(field: &str) -> StoreResult<()> {
    let root = field.split('.').next().unwrap_or(field);
    if root.is_empty() {
        return Err(StoreError::invalid_argument("empty field name"));
    }
    if PROTECTED_FIELDS.contains(&root) {
        return Err(StoreError::ProtectedField(field.to_string()));
    }
    Ok(())
}

/// Set a dotted path inside a JSON object, creating intermediate objects.
pub fn set_json_path(
    target: &mut serde_json::Value,
    path: &str,
    value: serde_json::Value,
) -> StoreResult<()> {
    let mut parts = path.split('.').peekable();
    let mut current = target;
    while let Some(part) = parts.next() {
        let map = current
            .as_object_mut()
            .ok_or_else(|| StoreError::invalid_argument(format!("{} is not an object", path)))?;
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return Ok(());
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }
    Err(StoreError::invalid_argument("empty field name"))
}

/// Read a dotted path inside a JSON object.
pub fn get_json_path<'a>(source: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.')
        .try_fold(source, |current, part| current.as_object()?.get(part))
}

/// Apply generic field writes to a copy of `job`.
///
/// Terminal jobs are frozen like their status. The result must still
/// deserialize as a job, so type mismatches are rejected before anything
/// is persisted.
pub fn apply_field_writes(
    job: &Job,
    fields: &HashMap<String, serde_json::Value>,
) -> StoreResult<Job> {
    if job.status.is_terminal() {
        return Err(StoreError::invalid_transition(format!(
            "job {} is {}",
            job.id, job.status
        )));
    }
    let mut json = serde_json::to_value(job)?;
    for (name, value) in fields {
        check_writable(name)?;
        set_json_path(&mut json, name, value.clone())?;
    }
    let mut updated: Job = serde_json::from_value(json)
        .map_err(|e| StoreError::invalid_argument(format!("invalid field value: {}", e)))?;
    updated.updated_at = Utc::now();
    Ok(updated)
}

/// Persisted job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job and return its id.
    async fn create(&self, job: &Job) -> StoreResult<JobId>;

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>>;

    /// Write status, step, progress and error together.
    ///
    /// Fails with `InvalidTransition` when the job is terminal or the
    /// transition is not allowed. Step and progress never move backwards.
    async fn update_status(&self, id: &JobId, update: &StatusUpdate) -> StoreResult<()>;

    /// Write one (possibly dotted) field, e.g. `artifacts.vocals`.
    async fn update_field(&self, id: &JobId, name: &str, value: serde_json::Value)
        -> StoreResult<()>;

    /// Write several fields atomically.
    async fn update_fields(
        &self,
        id: &JobId,
        fields: HashMap<String, serde_json::Value>,
    ) -> StoreResult<()>;

    /// Newest-first page of an owner's jobs. Pages are 1-based.
    async fn list_by_owner(&self, owner: &str, page: u32, page_size: u32) -> StoreResult<JobPage>;

    /// Mark completed with the final video URL.
    async fn complete(&self, id: &JobId, final_video_url: &str) -> StoreResult<()>;

    /// Jobs currently in `status`, oldest first.
    async fn list_by_status(&self, status: JobStatus, limit: u32) -> StoreResult<Vec<Job>>;
}

/// Persisted transcript segments, owned by a job.
#[async_trait]
pub trait SubtitleStore: Send + Sync {
    /// Delete every segment of the job, then insert `segments`.
    async fn replace_all(&self, job_id: &JobId, segments: &[TranscriptSegment]) -> StoreResult<()>;

    /// Segments ordered by index.
    async fn list(&self, job_id: &JobId, only_selected: bool) -> StoreResult<Vec<TranscriptSegment>>;

    /// Select exactly the given indices; every other segment is deselected.
    async fn update_selection(&self, job_id: &JobId, selected: &[u32]) -> StoreResult<()>;
}

/// Persisted stories and their analysis state.
#[async_trait]
pub trait StoryStore: Send + Sync {
    async fn get_story(&self, id: &StoryId) -> StoreResult<Option<Story>>;

    async fn put_story(&self, story: &Story) -> StoreResult<()>;

    /// Set the analysis state; `queued` and `processing` clear any earlier error.
    async fn set_analysis_state(&self, id: &StoryId, state: AnalysisState) -> StoreResult<()>;

    /// Store a result and mark the analysis completed.
    async fn save_analysis(&self, id: &StoryId, analysis: &StoryAnalysis) -> StoreResult<()>;

    async fn fail_analysis(&self, id: &StoryId, error: &str) -> StoreResult<()>;
}

/// The three stores, chosen once at startup.
#[derive(Clone)]
pub struct StoreSet {
    pub jobs: Arc<dyn JobStore>,
    pub subtitles: Arc<dyn SubtitleStore>,
    pub stories: Arc<dyn StoryStore>,
}

impl StoreSet {
    /// In-memory stores for local runs and tests.
    pub fn memory() -> Self {
        let store = Arc::new(crate::memory::MemoryStore::new());
        Self {
            jobs: store.clone(),
            subtitles: store.clone(),
            stories: store,
        }
    }

    /// Firestore-backed stores sharing one client.
    pub fn firestore(client: crate::client::FirestoreClient) -> Self {
        Self {
            jobs: Arc::new(crate::firestore_jobs::FirestoreJobStore::new(client.clone())),
            subtitles: Arc::new(crate::firestore_subtitles::FirestoreSubtitleStore::new(
                client.clone(),
            )),
            stories: Arc::new(crate::firestore_stories::FirestoreStoryStore::new(client)),
        }
    }
}
