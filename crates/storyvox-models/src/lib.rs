//! Shared data models for the StoryVox generation engine.
//!
//! This crate provides Serde-serializable types for:
//! - Generation jobs, their status and step machine
//! - Speaker/voice/avatar configuration
//! - Transcript segments, word timestamps and chunks
//! - Stories and their speaker analysis
//! - Analysis queue tasks and queue status snapshots

pub mod analysis;
pub mod job;
pub mod job_status;
pub mod speaker;
pub mod story;
pub mod transcript;

// Re-export common types
pub use analysis::{AnalysisTask, CurrentTask, QueueStatus};
pub use job::{artifact_keys, Job, JobId, JobPage, StatusUpdate};
pub use job_status::{JobProgress, JobStatus, JobStep};
pub use speaker::{AvatarRef, BoundingBox, SpeakerConfig};
pub use story::{AnalysisState, SpeakerProfile, SpeakerSpan, Story, StoryAnalysis, StoryId};
pub use transcript::{Chunk, TranscriptSegment, Transcription, TranscriptionSegment, WordTimestamp};
