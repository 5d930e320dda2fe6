//! Time-synchronized audio reconstruction plan for one chunk.

use std::path::PathBuf;

use storyvox_media::DelayedTrack;
use storyvox_models::{Chunk, TranscriptSegment};

/// One synthesized clip placed on the chunk timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineClip {
    pub segment_index: u32,
    pub path: PathBuf,
    /// Onset relative to the chunk start, in seconds
    pub offset: f64,
}

/// Where every clip of a chunk starts and how long the mix must be.
///
/// Offsets come from absolute segment timestamps, so a clip that runs long
/// or short never shifts the clips after it.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePlan {
    pub duration: f64,
    pub background: Option<PathBuf>,
    pub clips: Vec<TimelineClip>,
}

impl TimelinePlan {
    pub fn new(chunk: &Chunk) -> Self {
        Self {
            duration: chunk.duration(),
            background: None,
            clips: Vec::new(),
        }
    }

    /// Background slice that starts at the chunk start.
    pub fn with_background(mut self, path: impl Into<PathBuf>) -> Self {
        self.background = Some(path.into());
        self
    }

    pub fn add_clip(&mut self, chunk: &Chunk, segment: &TranscriptSegment, path: impl Into<PathBuf>) {
        self.clips.push(TimelineClip {
            segment_index: segment.index,
            path: path.into(),
            offset: chunk.relative_offset(segment),
        });
    }

    /// The same timeline with only the clips for `segments`, without background.
    pub fn voice_only<'a>(&self, segments: impl IntoIterator<Item = &'a u32>) -> Self {
        let wanted: Vec<u32> = segments.into_iter().copied().collect();
        Self {
            duration: self.duration,
            background: None,
            clips: self
                .clips
                .iter()
                .filter(|c| wanted.contains(&c.segment_index))
                .cloned()
                .collect(),
        }
    }

    /// Tracks for the mixer; the background always sits at offset 0.
    pub fn to_tracks(&self) -> Vec<DelayedTrack> {
        self.background
            .iter()
            .map(|bg| DelayedTrack::new(bg.clone(), 0.0))
            .chain(
                self.clips
                    .iter()
                    .map(|c| DelayedTrack::new(c.path.clone(), c.offset)),
            )
            .collect()
    }

    pub fn has_voice(&self) -> bool {
        !self.clips.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> Chunk {
        Chunk {
            index: 1,
            start: 30.0,
            end: 58.5,
            segments: vec![
                TranscriptSegment::new(4, 31.0, 33.0, "The fox ran."),
                TranscriptSegment::new(5, 42.5, 44.0, "The owl watched."),
                TranscriptSegment::new(6, 50.0, 58.0, "And then it rained."),
            ],
        }
    }

    #[test]
    fn test_offsets_come_from_absolute_timestamps() {
        let chunk = chunk();
        let mut plan = TimelinePlan::new(&chunk);
        for segment in &chunk.segments {
            plan.add_clip(&chunk, segment, format!("/tmp/clip_{}.wav", segment.index));
        }

        assert!((plan.duration - 28.5).abs() < 1e-9);
        let offsets: Vec<f64> = plan.clips.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![1.0, 12.5, 20.0]);
    }

    #[test]
    fn test_missing_clip_does_not_shift_later_clips() {
        let chunk = chunk();
        let mut plan = TimelinePlan::new(&chunk);
        // Segment 5 failed to synthesize
        plan.add_clip(&chunk, &chunk.segments[0], "/tmp/a.wav");
        plan.add_clip(&chunk, &chunk.segments[2], "/tmp/c.wav");
        assert_eq!(plan.clips[1].offset, 20.0);
    }

    #[test]
    fn test_background_is_first_track_at_zero() {
        let chunk = chunk();
        let mut plan = TimelinePlan::new(&chunk).with_background("/tmp/bg.wav");
        plan.add_clip(&chunk, &chunk.segments[1], "/tmp/b.wav");

        let tracks = plan.to_tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].path, PathBuf::from("/tmp/bg.wav"));
        assert_eq!(tracks[0].offset, 0.0);
        assert_eq!(tracks[1].offset, 12.5);
    }

    #[test]
    fn test_voice_only_keeps_duration() {
        let chunk = chunk();
        let mut plan = TimelinePlan::new(&chunk).with_background("/tmp/bg.wav");
        for segment in &chunk.segments {
            plan.add_clip(&chunk, segment, format!("/tmp/{}.wav", segment.index));
        }
        let owl = plan.voice_only(&[5]);
        assert_eq!(owl.duration, plan.duration);
        assert!(owl.background.is_none());
        assert_eq!(owl.clips.len(), 1);
        assert_eq!(owl.clips[0].offset, 12.5);
        assert!(!TimelinePlan::new(&chunk).has_voice());
    }
}
