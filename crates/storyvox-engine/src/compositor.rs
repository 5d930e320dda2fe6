//! Per-chunk compositing and final concatenation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use storyvox_media::{Corner, MediaToolchain, OverlayLayer};
use storyvox_models::JobId;
use storyvox_storage::{keys, ArtifactStore};

use crate::error::{EngineError, EngineResult};
use crate::generator::{ChunkAudio, SpeakerAvatar};

/// How a chunk ended up being composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    PictureInPicture,
    AudioOnly,
}

impl CompositeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositeMode::PictureInPicture => "pip",
            CompositeMode::AudioOnly => "audio_only",
        }
    }
}

/// One composited segment file.
#[derive(Debug, Clone)]
pub struct ChunkSegment {
    pub index: u32,
    pub path: PathBuf,
    pub url: String,
    pub mode: CompositeMode,
    /// Picture-in-picture was wanted but not produced
    pub fell_back: bool,
}

pub struct Compositor {
    toolchain: Arc<dyn MediaToolchain>,
    artifacts: Arc<dyn ArtifactStore>,
    pip_scale: f64,
    first_corner: Corner,
}

impl Compositor {
    pub fn new(
        toolchain: Arc<dyn MediaToolchain>,
        artifacts: Arc<dyn ArtifactStore>,
        pip_scale: f64,
        first_corner: Corner,
    ) -> Self {
        Self {
            toolchain,
            artifacts,
            pip_scale,
            first_corner,
        }
    }

    /// Compose the segment file for one chunk.
    ///
    /// With avatars the clips are overlaid in their slot corners; without
    /// them, or if the overlay fails, only the audio track is replaced.
    pub async fn composite_chunk(
        &self,
        job_id: &JobId,
        source_video: &Path,
        audio: &ChunkAudio,
        avatars: &[SpeakerAvatar],
        wanted_pip: bool,
    ) -> EngineResult<ChunkSegment> {
        let chunk = &audio.chunk;
        let base = audio.dir.join("source.mp4");
        self.toolchain
            .cut_video(source_video, &base, chunk.start, chunk.duration())
            .await?;

        let output = audio.dir.join("segment.mp4");
        let mut mode = CompositeMode::AudioOnly;
        if !avatars.is_empty() {
            match self.picture_in_picture(&base, avatars, &audio.audio_path, &output).await {
                Ok(()) => mode = CompositeMode::PictureInPicture,
                Err(e) => warn!(
                    chunk = chunk.index,
                    error = %e,
                    "Overlay failed, falling back to audio-only"
                ),
            }
        }
        if mode == CompositeMode::AudioOnly {
            self.toolchain
                .replace_audio(&base, &audio.audio_path, &output)
                .await?;
        }

        let url = self
            .artifacts
            .upload(&output, &keys::chunk_segment(job_id.as_str(), chunk.index))
            .await?;
        info!(chunk = chunk.index, mode = mode.as_str(), "Chunk composited");

        Ok(ChunkSegment {
            index: chunk.index,
            path: output,
            url,
            mode,
            fell_back: wanted_pip && mode == CompositeMode::AudioOnly,
        })
    }

    async fn picture_in_picture(
        &self,
        base: &Path,
        avatars: &[SpeakerAvatar],
        audio: &Path,
        output: &Path,
    ) -> EngineResult<()> {
        let layers: Vec<OverlayLayer> = avatars
            .iter()
            .map(|a| OverlayLayer::new(a.path.clone(), self.first_corner.nth_from(a.slot)))
            .collect();
        let overlaid = output.with_file_name("overlay.mp4");
        self.toolchain
            .overlay(base, &layers, self.pip_scale, &overlaid)
            .await?;
        self.toolchain.replace_audio(&overlaid, audio, output).await?;
        Ok(())
    }

    /// Concatenate segments in chunk order and upload the final video.
    pub async fn finalize(
        &self,
        job_id: &JobId,
        segments: &[ChunkSegment],
        work_dir: &Path,
    ) -> EngineResult<String> {
        if segments.is_empty() {
            return Err(EngineError::NoSuccessfulChunks);
        }
        let mut ordered: Vec<&ChunkSegment> = segments.iter().collect();
        ordered.sort_by_key(|s| s.index);
        let inputs: Vec<PathBuf> = ordered.iter().map(|s| s.path.clone()).collect();

        let output = work_dir.join("final.mp4");
        self.toolchain.concat(&inputs, &output).await?;
        let url = self
            .artifacts
            .upload(&output, &keys::final_video(job_id.as_str()))
            .await?;
        info!(job_id = %job_id, segments = inputs.len(), "Final video uploaded");
        Ok(url)
    }
}
