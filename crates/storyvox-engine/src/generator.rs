//! Per-chunk speech and avatar generation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use storyvox_media::MediaToolchain;
use storyvox_models::{Chunk, Job, SpeakerConfig, TranscriptSegment};
use storyvox_providers::{AvatarGenerator, AvatarRequest, CallLimiter, SpeechSynthesizer};
use storyvox_storage::{keys, ArtifactStore};

use crate::error::{EngineError, EngineResult};
use crate::retry::CallRetry;
use crate::timeline::TimelinePlan;

/// Reconstructed audio for one chunk.
#[derive(Debug, Clone)]
pub struct ChunkAudio {
    pub chunk: Chunk,
    pub dir: PathBuf,
    pub audio_path: PathBuf,
    pub audio_url: String,
    pub plan: TimelinePlan,
    /// Voiced segment indices keyed by position in `job.speakers`
    pub speaker_segments: BTreeMap<usize, Vec<u32>>,
    /// Clips that could not be synthesized
    pub failed_clips: usize,
}

/// A downloaded avatar clip for one speaker in one chunk.
#[derive(Debug, Clone)]
pub struct SpeakerAvatar {
    pub label: String,
    /// Overlay slot, stable across chunks
    pub slot: usize,
    pub path: PathBuf,
    pub url: String,
}

/// Avatar results for one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkAvatars {
    pub avatars: Vec<SpeakerAvatar>,
    /// Labels whose avatar generation failed
    pub failed: Vec<String>,
}

impl ChunkAvatars {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.avatars.is_empty()
    }
}

/// Drives speech and avatar providers for chunks.
pub struct ChunkGenerator {
    toolchain: Arc<dyn MediaToolchain>,
    artifacts: Arc<dyn ArtifactStore>,
    speech: Arc<dyn SpeechSynthesizer>,
    avatar: Arc<dyn AvatarGenerator>,
    limiter: CallLimiter,
    retry: CallRetry,
}

impl ChunkGenerator {
    pub fn new(
        toolchain: Arc<dyn MediaToolchain>,
        artifacts: Arc<dyn ArtifactStore>,
        speech: Arc<dyn SpeechSynthesizer>,
        avatar: Arc<dyn AvatarGenerator>,
        limiter: CallLimiter,
        retry: CallRetry,
    ) -> Self {
        Self {
            toolchain,
            artifacts,
            speech,
            avatar,
            limiter,
            retry,
        }
    }

    // ========================================================================
    // Speech
    // ========================================================================

    /// Synthesize every selected segment and mix them onto the chunk timeline.
    ///
    /// Individual clip failures are tolerated; a chunk where every clip
    /// failed has no usable audio and returns [`EngineError::NoUsableAudio`].
    pub async fn generate_audio(
        &self,
        job: &Job,
        chunk: &Chunk,
        work_dir: &Path,
        background: Option<&Path>,
    ) -> EngineResult<ChunkAudio> {
        let dir = work_dir.join(format!("chunk_{:03}", chunk.index));
        tokio::fs::create_dir_all(&dir).await?;

        let voiced: Vec<(usize, &SpeakerConfig, &TranscriptSegment)> = chunk
            .selected_segments()
            .filter_map(|segment| {
                let found = voice_for(&job.speakers, segment);
                if found.is_none() {
                    debug!(
                        chunk = chunk.index,
                        segment = segment.index,
                        speaker = ?segment.speaker,
                        "Speaker disabled or unknown, segment stays silent"
                    );
                }
                found.map(|(pos, speaker)| (pos, speaker, segment))
            })
            .collect();

        let results = join_all(voiced.iter().map(|(_, speaker, segment)| {
            let path = dir.join(format!("clip_{:05}.{}", segment.index, self.speech.extension()));
            async move {
                let result = self.synthesize(speaker, segment, &path).await;
                (path, result)
            }
        }))
        .await;

        let mut plan = TimelinePlan::new(chunk);
        let mut speaker_segments: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
        let mut failed_clips = 0;
        for ((pos, _, segment), (path, result)) in voiced.iter().zip(results) {
            match result {
                Ok(()) => {
                    plan.add_clip(chunk, segment, path);
                    speaker_segments.entry(*pos).or_default().push(segment.index);
                }
                Err(e) => {
                    failed_clips += 1;
                    warn!(
                        chunk = chunk.index,
                        segment = segment.index,
                        error = %e,
                        "Speech synthesis failed for segment"
                    );
                }
            }
        }
        if !voiced.is_empty() && !plan.has_voice() {
            return Err(EngineError::NoUsableAudio(chunk.index));
        }

        if let Some(background) = background {
            let slice = dir.join("background.wav");
            match self
                .toolchain
                .cut_audio(background, &slice, chunk.start, chunk.duration())
                .await
            {
                Ok(()) => plan = plan.with_background(slice),
                Err(e) => warn!(chunk = chunk.index, error = %e, "Background slice failed, mixing voice only"),
            }
        }

        let audio_path = dir.join("audio.wav");
        self.toolchain
            .delay_and_mix(&plan.to_tracks(), plan.duration, &audio_path)
            .await?;
        let audio_url = self
            .artifacts
            .upload(&audio_path, &keys::chunk_audio(job.id.as_str(), chunk.index))
            .await?;

        info!(
            chunk = chunk.index,
            clips = plan.clips.len(),
            failed_clips,
            background = plan.background.is_some(),
            "Chunk audio reconstructed"
        );

        Ok(ChunkAudio {
            chunk: chunk.clone(),
            dir,
            audio_path,
            audio_url,
            plan,
            speaker_segments,
            failed_clips,
        })
    }

    async fn synthesize(
        &self,
        speaker: &SpeakerConfig,
        segment: &TranscriptSegment,
        path: &Path,
    ) -> EngineResult<()> {
        let speech = self.speech.as_ref();
        let limiter = &self.limiter;
        let voice = speaker.voice_id.as_str();
        let text = segment.text.as_str();
        let audio = self
            .retry
            .run("tts", move || limiter.run("tts", speech.synthesize(voice, text)))
            .await?;
        tokio::fs::write(path, audio).await?;
        Ok(())
    }

    // ========================================================================
    // Avatars
    // ========================================================================

    /// Generate one avatar clip per voiced speaker that has an avatar.
    ///
    /// Speakers run concurrently. Failures are collected, never raised, so
    /// the caller can fall back to audio-only compositing.
    pub async fn generate_avatars(&self, job: &Job, audio: &ChunkAudio) -> ChunkAvatars {
        let slots = avatar_slots(&job.speakers);
        let requests: Vec<(usize, &SpeakerConfig, &Vec<u32>)> = audio
            .speaker_segments
            .iter()
            .filter_map(|(pos, segments)| {
                let speaker = job.speakers.get(*pos)?;
                speaker.avatar.as_ref()?;
                Some((*pos, speaker, segments))
            })
            .collect();

        let results = join_all(requests.iter().map(|(pos, speaker, segments)| async move {
            let label = speaker.display_label().to_string();
            let result = self.generate_avatar(job, audio, speaker, segments).await;
            (*pos, label, result)
        }))
        .await;

        let mut outcome = ChunkAvatars::default();
        for (pos, label, result) in results {
            match result {
                Ok((path, url)) => outcome.avatars.push(SpeakerAvatar {
                    label,
                    slot: slots.get(&pos).copied().unwrap_or(0),
                    path,
                    url,
                }),
                Err(e) => {
                    warn!(
                        chunk = audio.chunk.index,
                        speaker = %label,
                        error = %e,
                        "Avatar generation failed"
                    );
                    outcome.failed.push(label);
                }
            }
        }
        outcome.avatars.sort_by_key(|a| a.slot);
        outcome
    }

    async fn generate_avatar(
        &self,
        job: &Job,
        audio: &ChunkAudio,
        speaker: &SpeakerConfig,
        segments: &[u32],
    ) -> EngineResult<(PathBuf, String)> {
        let avatar_ref = speaker
            .avatar
            .as_ref()
            .ok_or_else(|| EngineError::invalid_input("speaker has no avatar"))?;
        let label = speaker.display_label();
        let chunk = audio.chunk.index;

        // Each speaker's avatar lip-syncs to their own lines only
        let voice_path = audio.dir.join(format!("voice_{}.wav", sanitize(label)));
        let voice_plan = audio.plan.voice_only(segments);
        self.toolchain
            .delay_and_mix(&voice_plan.to_tracks(), voice_plan.duration, &voice_path)
            .await?;

        let max = self.avatar.max_audio_duration().as_secs_f64();
        let input_path = audio.dir.join(format!("avatar_input_{}.wav", sanitize(label)));
        let written = self.toolchain.trim_audio(&voice_path, &input_path, max).await?;
        if written < voice_plan.duration {
            debug!(chunk, speaker = %label, written, max, "Avatar audio truncated");
        }
        let audio_url = self
            .artifacts
            .upload(&input_path, &keys::avatar_input(job.id.as_str(), chunk, label))
            .await?;

        let request = AvatarRequest::new(avatar_ref, audio_url);
        let provider = self.avatar.as_ref();
        let limiter = &self.limiter;
        let request = &request;
        let video_url = self
            .retry
            .run("avatar", move || provider.generate(request, limiter))
            .await?;

        let video_path = audio.dir.join(format!("avatar_{}.mp4", sanitize(label)));
        self.artifacts.download(&video_url, &video_path).await?;
        let url = self
            .artifacts
            .upload(&video_path, &keys::chunk_avatar(job.id.as_str(), chunk, label))
            .await?;
        info!(chunk, speaker = %label, "Avatar clip ready");
        Ok((video_path, url))
    }
}

/// Speaker that voices `segment`, with its position in `speakers`.
///
/// Labelled segments go to the enabled speaker with that label. Segments
/// without a label go to a matching unlabelled speaker, else to the first
/// enabled speaker.
pub fn voice_for<'a>(
    speakers: &'a [SpeakerConfig],
    segment: &TranscriptSegment,
) -> Option<(usize, &'a SpeakerConfig)> {
    let label = segment.speaker.as_deref();
    let enabled = || speakers.iter().enumerate().filter(|(_, s)| s.enabled);
    match enabled().find(|(_, s)| s.matches(label)) {
        Some(found) => Some(found),
        None if label.is_none() => enabled().next(),
        None => None,
    }
}

/// Overlay slot per speaker position, in speaker order, for speakers that
/// are enabled and have an avatar.
pub fn avatar_slots(speakers: &[SpeakerConfig]) -> BTreeMap<usize, usize> {
    speakers
        .iter()
        .enumerate()
        .filter(|(_, s)| s.enabled && s.avatar.is_some())
        .enumerate()
        .map(|(slot, (pos, _))| (pos, slot))
        .collect()
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyvox_models::AvatarRef;

    fn avatar(id: &str) -> AvatarRef {
        AvatarRef {
            avatar_id: id.into(),
            image_url: format!("https://cdn.example.com/{}.png", id),
            face_bbox: None,
            ext_bbox: None,
        }
    }

    #[test]
    fn test_avatar_slots_follow_speaker_order() {
        let mut disabled = SpeakerConfig::narrator("v2").with_label("owl").with_avatar(avatar("a2"));
        disabled.enabled = false;
        let speakers = vec![
            SpeakerConfig::narrator("v1").with_label("fox").with_avatar(avatar("a1")),
            disabled,
            SpeakerConfig::narrator("v3").with_label("bear"),
            SpeakerConfig::narrator("v4").with_label("hen").with_avatar(avatar("a4")),
        ];
        let slots = avatar_slots(&speakers);
        assert_eq!(slots.get(&0), Some(&0));
        assert_eq!(slots.get(&1), None);
        assert_eq!(slots.get(&2), None);
        assert_eq!(slots.get(&3), Some(&1));
    }

    fn segment(speaker: Option<&str>) -> TranscriptSegment {
        let mut segment = TranscriptSegment::new(0, 1.0, 2.0, "hello");
        segment.speaker = speaker.map(str::to_string);
        segment
    }

    #[test]
    fn test_voice_for_labelled_segments() {
        let mut owl = SpeakerConfig::narrator("v2").with_label("owl");
        owl.enabled = false;
        let speakers = vec![SpeakerConfig::narrator("v1").with_label("fox"), owl];

        let (pos, speaker) = voice_for(&speakers, &segment(Some("fox"))).unwrap();
        assert_eq!((pos, speaker.voice_id.as_str()), (0, "v1"));
        // Disabled and unknown speakers stay silent
        assert!(voice_for(&speakers, &segment(Some("owl"))).is_none());
        assert!(voice_for(&speakers, &segment(Some("hen"))).is_none());
    }

    #[test]
    fn test_voice_for_unlabelled_segment() {
        let mut fox = SpeakerConfig::narrator("v1").with_label("fox");
        fox.enabled = false;
        let speakers = vec![
            fox.clone(),
            SpeakerConfig::narrator("v2").with_label("owl"),
            SpeakerConfig::narrator("v3"),
        ];
        // An unlabelled speaker claims unlabelled lines
        assert_eq!(voice_for(&speakers, &segment(None)).map(|(p, _)| p), Some(2));

        let speakers = vec![fox, SpeakerConfig::narrator("v2").with_label("owl")];
        assert_eq!(voice_for(&speakers, &segment(None)).map(|(p, _)| p), Some(1));
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize("SPEAKER 01/x"), "SPEAKER_01_x");
    }

    #[test]
    fn test_chunk_avatars_completeness() {
        let mut outcome = ChunkAvatars::default();
        assert!(!outcome.is_complete());
        outcome.avatars.push(SpeakerAvatar {
            label: "fox".into(),
            slot: 0,
            path: PathBuf::from("/tmp/a.mp4"),
            url: "file:///tmp/a.mp4".into(),
        });
        assert!(outcome.is_complete());
        outcome.failed.push("owl".into());
        assert!(!outcome.is_complete());
    }
}
