//! Analysis queue task and status snapshot.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::StoryId;

/// A queued request to analyze one story.
///
/// Lives only in the in-memory queue; the story's persisted analysis state
/// is the durable projection of its presence.
#[derive(Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub story_id: StoryId,
    /// Local path or URL of the source video
    pub video_path: String,
    /// Per-request provider credential; never serialized
    #[serde(skip)]
    pub api_key_override: Option<String>,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl AnalysisTask {
    pub fn new(story_id: StoryId, video_path: impl Into<String>) -> Self {
        Self {
            story_id,
            video_path: video_path.into(),
            api_key_override: None,
            retry_count: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key_override = Some(api_key.into());
        self
    }

    /// The same task scheduled for another attempt.
    pub fn retried(mut self) -> Self {
        self.retry_count += 1;
        self.enqueued_at = Utc::now();
        self
    }
}

impl fmt::Debug for AnalysisTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisTask")
            .field("story_id", &self.story_id)
            .field("video_path", &self.video_path)
            .field(
                "api_key_override",
                &self.api_key_override.as_ref().map(|_| "<redacted>"),
            )
            .field("retry_count", &self.retry_count)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// The task currently held by the analysis worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CurrentTask {
    pub story_id: StoryId,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
}

/// Snapshot returned by get-queue-status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueueStatus {
    /// Tasks waiting in the FIFO
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<CurrentTask>,
    /// Rate-limited tasks waiting out their backoff
    pub pending_retries: usize,
    /// Whether the worker is running
    pub running: bool,
}
