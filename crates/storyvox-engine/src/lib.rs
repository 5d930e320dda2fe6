//! Story generation engine.
//!
//! This crate provides:
//! - Word-timestamp segmentation and chunk planning
//! - Per-chunk voice and avatar generation on a shared call limiter
//! - Picture-in-picture / audio-only compositing and final concatenation
//! - The job orchestrator with an active-job registry and restart recovery
//! - The story analysis pipeline driven by the analysis queue
//! - [`StoryService`], the operations exposed to the HTTP layer

pub mod analysis;
pub mod compositor;
pub mod config;
pub mod error;
pub mod generator;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod segmentation;
pub mod service;
pub mod timeline;

pub use analysis::StoryAnalysisPipeline;
pub use compositor::{ChunkSegment, CompositeMode, Compositor};
pub use config::{EngineConfig, SegmentationConfig};
pub use error::{EngineError, EngineResult};
pub use generator::{ChunkAudio, ChunkAvatars, ChunkGenerator, SpeakerAvatar};
pub use logging::JobLogger;
pub use orchestrator::JobOrchestrator;
pub use registry::{recover_interrupted, ActiveJob, ActiveJobRegistry, INTERRUPTED_ERROR};
pub use retry::CallRetry;
pub use segmentation::{attribute_speakers, build_segments, plan_chunks, segment_words};
pub use service::{CreateJobRequest, CreateStoryRequest, EnqueueAnalysisRequest, StoryService};
pub use timeline::{TimelineClip, TimelinePlan};
