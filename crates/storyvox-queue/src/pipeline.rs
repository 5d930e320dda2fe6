//! The work the queue serializes.

use async_trait::async_trait;
use storyvox_models::{AnalysisTask, StoryAnalysis};

use crate::error::PipelineError;

/// Extract → transcribe → classify for one story.
///
/// The queue owns the story's analysis state; implementations only produce
/// the result.
#[async_trait]
pub trait AnalysisPipeline: Send + Sync {
    async fn analyze(&self, task: &AnalysisTask) -> Result<StoryAnalysis, PipelineError>;
}
