//! Transcript types: word timestamps, subtitle segments and chunks.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single transcribed word with absolute timing in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
    /// Speaker label when the transcriber diarizes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl WordTimestamp {
    pub fn new(word: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            word: word.into(),
            start,
            end,
            speaker: None,
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }
}

/// Provider-level transcript segment (before our own segmentation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Full transcription result from a transcription provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub words: Vec<WordTimestamp>,
    #[serde(default)]
    pub segments: Vec<TranscriptionSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A subtitle line owned by one job.
///
/// Times are absolute seconds relative to the start of the source audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptSegment {
    /// Contiguous 0-based position within the job
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Whether this line is re-voiced in the output
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

impl TranscriptSegment {
    pub fn new(index: u32, start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            index,
            start,
            end,
            text: text.into(),
            speaker: None,
            selected: true,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Length of the intersection with `[start, end)`.
    pub fn overlap(&self, start: f64, end: f64) -> f64 {
        (self.end.min(end) - self.start.max(start)).max(0.0)
    }
}

/// Consecutive segments grouped for one generation/compositing pass.
///
/// Never persisted; recomputed from the subtitles on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub segments: Vec<TranscriptSegment>,
}

impl Chunk {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Segments whose dialogue is re-voiced.
    pub fn selected_segments(&self) -> impl Iterator<Item = &TranscriptSegment> {
        self.segments.iter().filter(|s| s.selected)
    }

    /// Onset of `segment` relative to the chunk start.
    ///
    /// Always derived from absolute timestamps, never from accumulated
    /// clip durations.
    pub fn relative_offset(&self, segment: &TranscriptSegment) -> f64 {
        (segment.start - self.start).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_overlap() {
        let seg = TranscriptSegment::new(0, 2.0, 5.0, "hello");
        assert!((seg.overlap(0.0, 3.0) - 1.0).abs() < 1e-9);
        assert!((seg.overlap(6.0, 9.0)).abs() < 1e-9);
        assert!((seg.duration() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_chunk_relative_offset() {
        let mut late = TranscriptSegment::new(1, 42.5, 44.0, "world");
        late.selected = false;
        let chunk = Chunk {
            index: 1,
            start: 30.0,
            end: 60.0,
            segments: vec![TranscriptSegment::new(0, 31.0, 33.0, "hello"), late],
        };
        assert!((chunk.relative_offset(&chunk.segments[1]) - 12.5).abs() < 1e-9);
        assert_eq!(chunk.selected_segments().count(), 1);
    }

    #[test]
    fn test_selected_defaults_true() {
        let seg: TranscriptSegment =
            serde_json::from_str(r#"{"index":0,"start":0.0,"end":1.0,"text":"hi"}"#).unwrap();
        assert!(seg.selected);
    }
}
