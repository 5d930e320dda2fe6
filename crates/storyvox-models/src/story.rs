//! Stories and their speaker analysis.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a story.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct StoryId(pub String);

impl StoryId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable projection of a story's presence in the analysis queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    #[default]
    Idle,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl AnalysisState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::Idle => "idle",
            AnalysisState::Queued => "queued",
            AnalysisState::Processing => "processing",
            AnalysisState::Completed => "completed",
            AnalysisState::Failed => "failed",
        }
    }

    /// Queued or in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, AnalysisState::Queued | AnalysisState::Processing)
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnalysisState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AnalysisState::Idle),
            "queued" => Ok(AnalysisState::Queued),
            "processing" => Ok(AnalysisState::Processing),
            "completed" => Ok(AnalysisState::Completed),
            "failed" => Ok(AnalysisState::Failed),
            other => Err(format!("unknown analysis state: {}", other)),
        }
    }
}

/// A speaker detected in a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpeakerProfile {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fraction of total attributed speech time (0.0-1.0)
    #[serde(default)]
    pub speech_share: f64,
}

/// A time span attributed to one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpeakerSpan {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

impl SpeakerSpan {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Result of the speaker/title/description analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoryAnalysis {
    pub title: String,
    pub description: String,
    pub speakers: Vec<SpeakerProfile>,
    #[serde(default)]
    pub spans: Vec<SpeakerSpan>,
    pub analyzed_at: DateTime<Utc>,
}

impl StoryAnalysis {
    /// Recompute each speaker's share of attributed speech time from spans.
    pub fn recompute_shares(&mut self) {
        let total: f64 = self.spans.iter().map(SpeakerSpan::duration).sum();
        for speaker in &mut self.speakers {
            let own: f64 = self
                .spans
                .iter()
                .filter(|s| s.speaker == speaker.label)
                .map(SpeakerSpan::duration)
                .sum();
            speaker.speech_share = if total > 0.0 { own / total } else { 0.0 };
        }
    }

    /// Collapse to a single speaker when one dominates.
    ///
    /// Applies only with two or more speakers and when the top speaker's
    /// share strictly exceeds `threshold`. Returns the kept label.
    pub fn collapse_dominant_speaker(&mut self, threshold: f64) -> Option<String> {
        if self.speakers.len() < 2 {
            return None;
        }
        let dominant = self
            .speakers
            .iter()
            .max_by(|a, b| a.speech_share.total_cmp(&b.speech_share))?
            .clone();
        if dominant.speech_share <= threshold {
            return None;
        }

        for span in &mut self.spans {
            span.speaker = dominant.label.clone();
        }
        self.speakers = vec![SpeakerProfile {
            speech_share: 1.0,
            ..dominant.clone()
        }];
        Some(dominant.label)
    }

    /// Speaker whose spans overlap `[start, end)` the most.
    pub fn speaker_for(&self, start: f64, end: f64) -> Option<&str> {
        let mut best: Option<(&str, f64)> = None;
        for span in &self.spans {
            let overlap = (span.end.min(end) - span.start.max(start)).max(0.0);
            if overlap <= 0.0 {
                continue;
            }
            match best {
                Some((_, current)) if current >= overlap => {}
                _ => best = Some((span.speaker.as_str(), overlap)),
            }
        }
        best.map(|(label, _)| label)
    }

    pub fn has_speaker(&self, label: &str) -> bool {
        self.speakers.iter().any(|s| s.label == label)
    }
}

/// A source story.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Story {
    pub id: StoryId,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub analysis_state: AnalysisState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<StoryAnalysis>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    pub fn new(id: StoryId, owner: impl Into<String>, video_url: Option<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            video_url,
            title: None,
            analysis_state: AnalysisState::Idle,
            analysis_error: None,
            analysis: None,
            updated_at: Utc::now(),
        }
    }
}
