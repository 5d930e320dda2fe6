//! Job status and step state machine.
//!
//! A job moves `pending -> processing -> {completed | failed}`. While
//! processing, the `step` field records which pipeline stage is running.
//! Steps are ordered and only ever move forward within one run.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Top-level job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job record exists but the pipeline has not started
    #[default]
    Pending,
    /// Pipeline is running
    Processing,
    /// Final video is available
    Completed,
    /// Job failed; `error` carries the reason
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a status write from `self` to `next` is allowed.
    ///
    /// Re-writing `processing` is allowed so step/progress updates can be
    /// expressed as status updates.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(
                next,
                JobStatus::Pending | JobStatus::Processing | JobStatus::Failed
            ),
            JobStatus::Processing => !matches!(next, JobStatus::Pending),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Pipeline step while a job is processing.
///
/// Declaration order is pipeline order; `Ord` is derived from it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum JobStep {
    #[default]
    Init,
    ExtractingAudio,
    SeparatingVocals,
    Transcribing,
    GeneratingVoice,
    GeneratingAvatar,
    CompositingVideo,
    Completed,
}

impl JobStep {
    pub const ALL: [JobStep; 8] = [
        JobStep::Init,
        JobStep::ExtractingAudio,
        JobStep::SeparatingVocals,
        JobStep::Transcribing,
        JobStep::GeneratingVoice,
        JobStep::GeneratingAvatar,
        JobStep::CompositingVideo,
        JobStep::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStep::Init => "init",
            JobStep::ExtractingAudio => "extracting-audio",
            JobStep::SeparatingVocals => "separating-vocals",
            JobStep::Transcribing => "transcribing",
            JobStep::GeneratingVoice => "generating-voice",
            JobStep::GeneratingAvatar => "generating-avatar",
            JobStep::CompositingVideo => "compositing-video",
            JobStep::Completed => "completed",
        }
    }

    /// Steps only move forward; skipping ahead is allowed.
    pub fn can_advance_to(&self, next: JobStep) -> bool {
        next >= *self
    }

    /// Progress value when the step begins.
    pub fn base_progress(&self) -> u8 {
        match self {
            JobStep::Init => 0,
            JobStep::ExtractingAudio => 5,
            JobStep::SeparatingVocals => 15,
            JobStep::Transcribing => 25,
            JobStep::GeneratingVoice => 35,
            JobStep::GeneratingAvatar => 60,
            JobStep::CompositingVideo => 85,
            JobStep::Completed => 100,
        }
    }

    /// Highest progress reported while the step runs.
    ///
    /// Compositing stops at 95; the last points belong to the final upload.
    pub fn band_end(&self) -> u8 {
        match self {
            JobStep::CompositingVideo => 95,
            _ => self.next().map(|s| s.base_progress()).unwrap_or(100),
        }
    }

    /// Progress at `fraction` (0.0..=1.0) of the way through this step.
    pub fn progress_at(&self, fraction: f64) -> u8 {
        let start = self.base_progress();
        let end = self.band_end();
        let span = end.saturating_sub(start) as f64;
        let fraction = fraction.clamp(0.0, 1.0);
        // Stay strictly below the next step's base until it starts
        let ceiling = match self.next() {
            Some(next) => end.min(next.base_progress().saturating_sub(1)).max(start),
            None => end,
        };
        start.saturating_add((span * fraction).floor() as u8).min(ceiling)
    }

    /// The step after this one, if any.
    pub fn next(&self) -> Option<JobStep> {
        let pos = JobStep::ALL.iter().position(|s| s == self)?;
        JobStep::ALL.get(pos + 1).copied()
    }
}

impl fmt::Display for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStep::ALL
            .iter()
            .find(|step| step.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown job step: {}", s))
    }
}

/// Forward-only step and monotonic progress tracker.
///
/// Owned by the orchestrator for the lifetime of one run; every status
/// write goes through it so the persisted record never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobProgress {
    step: JobStep,
    progress: u8,
}

impl JobProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted step/progress pair.
    pub fn resume(step: JobStep, progress: u8) -> Self {
        Self {
            step,
            progress: progress.min(100),
        }
    }

    pub fn step(&self) -> JobStep {
        self.step
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Enter `step`. Returns false (and changes nothing) on regression.
    pub fn advance(&mut self, step: JobStep) -> bool {
        if !self.step.can_advance_to(step) {
            return false;
        }
        self.step = step;
        self.progress = self.progress.max(step.base_progress());
        true
    }

    /// Raise progress. Lower values are ignored.
    pub fn raise(&mut self, progress: u8) -> u8 {
        self.progress = self.progress.max(progress.min(100));
        self.progress
    }

    /// Raise progress to `fraction` of the current step's band.
    pub fn raise_within_step(&mut self, fraction: f64) -> u8 {
        let target = self.step.progress_at(fraction);
        self.raise(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn test_step_order_and_names() {
        for pair in JobStep::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].base_progress() < pair[1].base_progress());
        }
        assert_eq!(JobStep::SeparatingVocals.as_str(), "separating-vocals");
        assert_eq!("compositing-video".parse::<JobStep>().unwrap(), JobStep::CompositingVideo);
        assert_eq!(
            serde_json::to_string(&JobStep::GeneratingAvatar).unwrap(),
            "\"generating-avatar\""
        );
    }

    #[test]
    fn test_progress_within_step_stays_in_band() {
        assert_eq!(JobStep::GeneratingVoice.progress_at(0.0), 35);
        assert_eq!(JobStep::GeneratingVoice.progress_at(0.5), 47);
        assert!(JobStep::GeneratingVoice.progress_at(1.0) < JobStep::GeneratingAvatar.base_progress());
    }

    #[test]
    fn test_compositing_progress_stops_at_95() {
        assert_eq!(JobStep::CompositingVideo.progress_at(0.0), 85);
        assert_eq!(JobStep::CompositingVideo.progress_at(0.5), 90);
        assert_eq!(JobStep::CompositingVideo.progress_at(1.0), 95);
        assert_eq!(JobStep::GeneratingAvatar.progress_at(1.0), 84);
        assert_eq!(JobStep::Completed.progress_at(0.5), 100);
    }

    #[test]
    fn test_tracker_never_regresses() {
        let mut tracker = JobProgress::new();
        assert!(tracker.advance(JobStep::Transcribing));
        assert_eq!(tracker.progress(), 25);

        assert!(!tracker.advance(JobStep::ExtractingAudio));
        assert_eq!(tracker.step(), JobStep::Transcribing);

        tracker.raise(40);
        assert_eq!(tracker.raise(10), 40);

        // Skipping ahead is allowed
        assert!(tracker.advance(JobStep::CompositingVideo));
        assert_eq!(tracker.progress(), 85);
    }
}
