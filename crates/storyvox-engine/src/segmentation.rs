//! Word timestamps to subtitle segments, subtitle segments to chunks.
//!
//! Everything here is pure: identical input always yields identical output.

use storyvox_models::{Chunk, StoryAnalysis, TranscriptSegment, Transcription, WordTimestamp};

use crate::config::SegmentationConfig;

/// Chunks shorter than this are not worth a compositing pass.
const MIN_CHUNK_DURATION: f64 = 1e-3;

struct SegmentBuilder {
    start: f64,
    end: f64,
    words: Vec<String>,
    speaker: Option<String>,
}

impl SegmentBuilder {
    fn open(word: &WordTimestamp) -> Self {
        Self {
            start: word.start,
            end: word.end,
            words: vec![word.word.trim().to_string()],
            speaker: word.speaker.clone(),
        }
    }

    fn should_close(&self, word: &WordTimestamp, config: &SegmentationConfig) -> bool {
        if word.start - self.end > config.pause_threshold {
            return true;
        }
        if word.end - self.start > config.max_segment_duration {
            return true;
        }
        matches!(
            (&self.speaker, &word.speaker),
            (Some(current), Some(next)) if current != next
        )
    }

    fn push(&mut self, word: &WordTimestamp) {
        self.end = self.end.max(word.end);
        self.words.push(word.word.trim().to_string());
        if self.speaker.is_none() {
            self.speaker = word.speaker.clone();
        }
    }

    fn finish(self, index: u32) -> TranscriptSegment {
        let mut segment = TranscriptSegment::new(index, self.start, self.end, self.words.join(" "));
        segment.speaker = self.speaker;
        segment
    }
}

/// Group words into segments.
///
/// A segment closes when the pause before the next word exceeds the pause
/// threshold, when the next word would push it past the maximum duration,
/// or when two labelled words disagree on the speaker.
pub fn segment_words(words: &[WordTimestamp], config: &SegmentationConfig) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();
    let mut current: Option<SegmentBuilder> = None;

    for word in words.iter().filter(|w| !w.word.trim().is_empty()) {
        current = match current.take() {
            Some(mut builder) if !builder.should_close(word, config) => {
                builder.push(word);
                Some(builder)
            }
            Some(builder) => {
                segments.push(builder.finish(segments.len() as u32));
                Some(SegmentBuilder::open(word))
            }
            None => Some(SegmentBuilder::open(word)),
        };
    }
    if let Some(builder) = current {
        segments.push(builder.finish(segments.len() as u32));
    }
    segments
}

/// Segments for a transcription.
///
/// Uses word timestamps when the provider returned them, otherwise the
/// provider's own segments.
pub fn build_segments(transcription: &Transcription, config: &SegmentationConfig) -> Vec<TranscriptSegment> {
    if !transcription.words.is_empty() {
        return segment_words(&transcription.words, config);
    }
    transcription
        .segments
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .enumerate()
        .map(|(i, s)| TranscriptSegment::new(i as u32, s.start, s.end, s.text.trim()))
        .collect()
}

/// Label unattributed segments with the analysis span they overlap most.
pub fn attribute_speakers(segments: &mut [TranscriptSegment], analysis: &StoryAnalysis) {
    for segment in segments.iter_mut().filter(|s| s.speaker.is_none()) {
        segment.speaker = analysis
            .speaker_for(segment.start, segment.end)
            .map(str::to_string);
    }
}

struct ChunkPlanner {
    max: f64,
    chunks: Vec<Chunk>,
    start: f64,
    current: Vec<TranscriptSegment>,
    last_end: f64,
}

impl ChunkPlanner {
    fn close(&mut self, end: f64) {
        let segments = std::mem::take(&mut self.current);
        if end - self.start >= MIN_CHUNK_DURATION || !segments.is_empty() {
            self.chunks.push(Chunk {
                index: self.chunks.len() as u32,
                start: self.start,
                end,
                segments,
            });
        }
        self.start = end;
    }

    fn add(&mut self, segment: &TranscriptSegment) {
        if !self.current.is_empty() && segment.end - self.start > self.max {
            let end = segment.start.min(self.start + self.max).max(self.last_end);
            self.close(end);
        }
        // Long silences become segment-free chunks of at most `max`
        while self.current.is_empty()
            && segment.end - self.start > self.max
            && segment.start > self.start
        {
            let end = segment.start.min(self.start + self.max);
            self.close(end);
        }
        self.current.push(segment.clone());
        self.last_end = self.last_end.max(segment.end);
    }

    fn finish(mut self, total_duration: f64) -> Vec<Chunk> {
        let total = total_duration.max(self.last_end);
        if !self.current.is_empty() {
            let end = if total - self.start > self.max {
                (self.start + self.max).max(self.last_end)
            } else {
                total
            };
            self.close(end);
        }
        while total - self.start >= MIN_CHUNK_DURATION {
            let end = (self.start + self.max).min(total);
            self.close(end);
        }
        self.chunks
    }
}

/// Group segments into chunks covering `[0, total_duration)`.
///
/// Chunks are contiguous and split only at segment boundaries. A chunk is
/// at most `max_chunk_duration` long unless it holds exactly one segment
/// that is itself longer. Gaps between segments belong to the chunk before.
pub fn plan_chunks(
    segments: &[TranscriptSegment],
    total_duration: f64,
    max_chunk_duration: f64,
) -> Vec<Chunk> {
    let mut ordered: Vec<&TranscriptSegment> = segments.iter().collect();
    ordered.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.index.cmp(&b.index)));

    let mut planner = ChunkPlanner {
        max: max_chunk_duration.max(MIN_CHUNK_DURATION),
        chunks: Vec::new(),
        start: 0.0,
        current: Vec::new(),
        last_end: 0.0,
    };
    for segment in ordered {
        planner.add(segment);
    }
    planner.finish(total_duration)
}
